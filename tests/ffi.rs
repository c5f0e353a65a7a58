//! C ABI surface tests: string ownership, JSON envelopes, async callback.

use std::ffi::{CStr, CString};
use std::net::Ipv4Addr;
use std::os::raw::{c_char, c_void};
use std::time::Duration;

use serde_json::Value;

use dnsprobe::ffi::{dns_request, dns_request_async, dns_request_json, free_string};
use dnsprobe::message::{Message, Rdata, Record, EDNS_OPTION_SUBNET};

unsafe fn take_json(result: *mut c_char) -> Value {
    assert!(!result.is_null(), "ffi returned a null pointer");
    let text = CStr::from_ptr(result).to_str().unwrap().to_string();
    free_string(result);
    serde_json::from_str(&text).unwrap()
}

/// Blocking one-shot UDP resolver on a plain std socket, so it works without
/// any runtime of its own. Returns the query it saw.
fn spawn_std_resolver() -> (std::net::SocketAddr, std::thread::JoinHandle<Message>) {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = socket.local_addr().unwrap();
    let handle = std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let (n, peer) = socket.recv_from(&mut buf).unwrap();
        let query = Message::unpack(&buf[..n]).unwrap();
        let mut response = query.clone();
        response.header.response = true;
        response.answers.push(Record {
            name: query.questions[0].name.clone(),
            rtype: query.questions[0].qtype,
            rclass: query.questions[0].qclass,
            ttl: 60,
            rdata: Rdata::A(Ipv4Addr::new(192, 0, 2, 1)),
        });
        socket.send_to(&response.pack().unwrap(), peer).unwrap();
        query
    });
    (addr, handle)
}

#[test]
fn empty_server_yields_error_envelope() {
    let qname = CString::new("example.com").unwrap();
    let value = unsafe {
        take_json(dns_request(
            std::ptr::null(),
            qname.as_ptr(),
            std::ptr::null(),
            std::ptr::null(),
            std::ptr::null(),
            std::ptr::null(),
        ))
    };
    assert_eq!(value["code"], -1);
    assert!(value["message"].as_str().unwrap().contains("empty server"));
    assert!(value["causes"].is_array());
    assert!(value["stack"].is_array());
}

#[test]
fn json_entry_round_trips_and_injects_ecs() {
    let (addr, handle) = spawn_std_resolver();
    let request = CString::new(format!(
        r#"{{"server":"udp://{addr}","qname":"example.com","client_subnet":"1.2.3.0/24"}}"#
    ))
    .unwrap();
    let value = unsafe { take_json(dns_request_json(request.as_ptr())) };

    assert_eq!(value["flags"]["rcode"], 0);
    assert_eq!(value["answer"][0]["type"], "A");
    assert_eq!(value["answer"][0]["result"], "192.0.2.1");
    assert!(value["rtt"].as_u64().unwrap() > 0);

    // The outgoing query must carry exactly one subnet option.
    let query = handle.join().unwrap();
    let opt = query.edns().expect("query had an OPT record");
    let Rdata::Opt(options) = &opt.rdata else {
        panic!("opt rdata");
    };
    let subnet: Vec<_> = options
        .iter()
        .filter(|o| o.code == EDNS_OPTION_SUBNET)
        .collect();
    assert_eq!(subnet.len(), 1);
    assert_eq!(subnet[0].data, vec![0, 1, 24, 0, 1, 2, 3, 0]);
}

#[test]
fn malformed_json_request_is_reported() {
    let request = CString::new("{\"server\":").unwrap();
    let value = unsafe { take_json(dns_request_json(request.as_ptr())) };
    assert_eq!(value["code"], -1);
    assert_eq!(value["type"], "DnsError::Build");
}

unsafe extern "C" fn forward_result(result: *mut c_char, user_data: *mut c_void) {
    let sender = &*(user_data as *const std::sync::mpsc::Sender<String>);
    let text = CStr::from_ptr(result).to_str().unwrap().to_string();
    let _ = sender.send(text);
}

#[test]
fn async_entry_invokes_callback_once() {
    let (tx, rx) = std::sync::mpsc::channel::<String>();
    let tx = Box::into_raw(Box::new(tx));
    let qname = CString::new("example.com").unwrap();
    unsafe {
        dns_request_async(
            std::ptr::null(), // empty server -> error envelope, no network
            qname.as_ptr(),
            std::ptr::null(),
            std::ptr::null(),
            std::ptr::null(),
            std::ptr::null(),
            std::ptr::null(),
            Some(forward_result),
            tx as *mut c_void,
        );
    }
    let text = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    let value: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["code"], -1);
    assert!(value["message"].as_str().unwrap().contains("empty server"));
    // Exactly once: nothing else arrives.
    assert!(rx
        .recv_timeout(Duration::from_millis(200))
        .is_err());
    drop(unsafe { Box::from_raw(tx) });
}
