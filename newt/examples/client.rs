use newt::config::Config;
use newt::error::ResultExt;
use newt::req::{Req, Uri};
use newt::Client;

fn main() {
  simple_logger::init_with_level(log::Level::Info).unwrap();

  let mut client = Client::try_new(Config::new("coap://127.0.0.1:5683/")).unwrap();

  client.ping().unwrap();
  log::info!("pinged ok!");

  let hello = Uri::parse("coap://127.0.0.1:5683/hello").unwrap();

  log::info!("CON GET /hello");
  let rep = client.send(Req::get(&hello)).unwrap();
  log::info!("ok! {} {:?}", rep.code(), rep.payload_string().unwrap());

  log::info!("NON GET /hello");
  let mut req = Req::get(&hello);
  req.non();
  match client.send(req).timeout_ok().unwrap() {
    | Some(rep) => log::info!("ok! {} {:?}", rep.code(), rep.payload_string().unwrap()),
    | None => log::info!("ok! did not receive a response"),
  }

  let config = Uri::parse("coap://127.0.0.1:5683/config").unwrap();

  log::info!("CON PUT /config (blockwise)");
  let mut req = Req::put(&config);
  req.set_payload(vec![0u8; 5000]);
  let rep = client.send(req).unwrap();
  log::info!("ok! {}", rep.code());
}
