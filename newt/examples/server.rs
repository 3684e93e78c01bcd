use newt::config::ServerConfig;
use newt::req::Method;
use newt::resp::code;
use newt::server::{Endpoint, Server};
use newt_msg::ContentFormat;

fn main() {
  simple_logger::init_with_level(log::Level::Debug).unwrap();

  let mut server = Server::try_new(ServerConfig::default(), 5683).unwrap();

  server.endpoint(Endpoint::new(Method::GET, "/hello", |_| {
                    log::info!("a client said hello");
                    (code::CONTENT, b"hello, world!".to_vec())
                  }).with_content_format(ContentFormat::Text));

  server.endpoint(Endpoint::new(Method::GET, "/sensor/temp", |_| {
                    (code::CONTENT, b"23".to_vec())
                  }).with_content_format(ContentFormat::Text));

  server.endpoint(Endpoint::new(Method::PUT, "/config", |req| {
                    log::info!("new config: {} bytes", req.data().payload().len());
                    (code::CHANGED, Vec::new())
                  }));

  server.run().unwrap();
}
