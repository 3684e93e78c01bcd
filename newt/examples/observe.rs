use std::sync::Arc;
use std::time::Duration;

use newt::config::Config;
use newt::net::StdResolver;
use newt::store::{CallbackId, CallbackTable, MemStore};
use newt::time::SystemClock;
use newt::Client;

const TEMPERATURE_CB: CallbackId = CallbackId(1);

fn main() {
  simple_logger::init_with_level(log::Level::Info).unwrap();

  let mut table = CallbackTable::new();
  table.register(TEMPERATURE_CB,
                 Arc::new(|rep| log::info!("temperature is now {:?}", rep.payload_string())),
                 Arc::new(|| log::info!("temperature subscription closed")));

  let store = Arc::new(MemStore::new());

  let mut client =
    Client::<std::net::UdpSocket, _>::try_new_with(Config::new("coap://127.0.0.1:5683/"),
                                                   SystemClock::new(),
                                                   StdResolver,
                                                   Arc::new(table),
                                                   Some(store)).unwrap();

  client.register_observe("coap://127.0.0.1:5683/sensor/temp", TEMPERATURE_CB, None)
        .unwrap();

  std::thread::sleep(Duration::from_secs(60));

  client.teardown();
}
