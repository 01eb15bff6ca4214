//! Small usage demo for [`gc_client::Client`]: connect to a device,
//! watch connection lifecycle events on a background thread, and send
//! a couple of requests from the main thread.

use std::env;
use std::thread;
use std::time::Duration;

use gc_client::{Client, ConnectionEvent};

fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(4998);

    let client = Client::new(host.clone(), port);

    let events = client.events();
    thread::spawn(move || {
        for event in events {
            match event {
                ConnectionEvent::State(kind) => println!("[state] {kind:?}"),
                ConnectionEvent::Connect => println!("[connect] connected"),
                ConnectionEvent::Close => println!("[close] disconnected"),
                ConnectionEvent::Error(err) => println!("[error] {err}"),
            }
        }
    });

    println!("connecting to {host}:{port}...");
    client.connect();

    match client.send("getversion") {
        Ok(version) => println!("getversion -> {version}"),
        Err(e) => println!("getversion failed: {e}"),
    }

    match client.send("getdevices") {
        Ok(listing) => println!("getdevices -> {listing}"),
        Err(e) => println!("getdevices failed: {e}"),
    }

    match client.send("sendir,1:1,1,38000,1,1,347,173,21,21,21,65,21,21,21,21,21,65,21,21,21,21,21,21,21,65,21,1517") {
        Ok(response) => println!("sendir -> {response}"),
        Err(e) => println!("sendir failed: {e}"),
    }

    thread::sleep(Duration::from_millis(200));
    client.close();
}
