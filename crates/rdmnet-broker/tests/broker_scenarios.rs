// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end scenarios against a real, running `Broker` over real TCP
//! sockets, covering `spec.md` §8's testable properties at the protocol
//! level rather than the routing-engine unit level already covered in
//! `routing.rs`'s inline tests.

use std::time::Duration;

use rdmnet_broker::{Broker, BrokerConfig};
use rdmnet_core::codec::broker::ConnectStatusCode;
use rdmnet_core::codec::cursor::{Cursor, CursorMut};
use rdmnet_core::codec::{
    BrokerPdu, ClientEntry, ClientEntryData, ClientType, RdmCommandBuffer, RootPdu, RootVector,
    RptHeader, RptPdu, RptStatusCode, RptVector,
};
use rdmnet_core::ids::{Cid, Scope, Uid};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn encode(sender_cid: Cid, vector: RootVector) -> Vec<u8> {
    let root = RootPdu { sender_cid, vector };
    let mut buf = vec![0u8; 4096];
    let mut cur = CursorMut::new(&mut buf);
    root.pack(&mut cur).unwrap();
    let len = cur.offset();
    buf.truncate(len);
    buf
}

async fn send_connect(stream: &mut TcpStream, cid: Cid, scope: &Scope, uid: Uid, role: ClientType) {
    let entry = ClientEntry {
        cid,
        data: ClientEntryData::Rpt {
            uid,
            client_type: role,
            binding_cid: Cid::new([0; 16]),
        },
    };
    let bytes = encode(
        cid,
        RootVector::Broker(vec![BrokerPdu::Connect {
            scope: scope.clone(),
            e133_version: 1,
            client_entry: entry,
        }]),
    );
    stream.write_all(&bytes).await.unwrap();
}

/// Reads exactly one root-layer message's worth of broker PDUs off the
/// stream. Good enough for these tests: each step here provokes exactly one
/// reply before the next write.
async fn read_one(stream: &mut TcpStream) -> RootPdu {
    let mut buf = vec![0u8; 8192];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "peer closed before sending a reply");
        let mut cur = Cursor::new(&buf[..n]);
        if let Ok(pdu) = RootPdu::unpack(&mut cur) {
            return pdu;
        }
    }
}

async fn start_broker(scope: &str) -> (Broker, std::net::SocketAddr) {
    start_broker_with(scope, |_| {}).await
}

async fn start_broker_with(
    scope: &str,
    customize: impl FnOnce(&mut BrokerConfig),
) -> (Broker, std::net::SocketAddr) {
    // `run()` binds the listener itself and doesn't hand back the address,
    // so a free port is picked by binding and immediately dropping a probe
    // listener, then telling the broker to bind that same port.
    let addr = {
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        probe.local_addr().unwrap()
    };
    let mut config = BrokerConfig {
        scope: scope.to_string(),
        listen_addrs: vec![addr.ip()],
        port: addr.port(),
        ..Default::default()
    };
    customize(&mut config);
    let broker = Broker::new(config).unwrap();
    let run_broker = broker.clone();
    tokio::spawn(async move {
        let _ = run_broker.run().await;
    });
    // Give the acceptor a moment to bind before tests connect.
    tokio::time::sleep(Duration::from_millis(50)).await;
    (broker, addr)
}

#[tokio::test]
async fn two_controllers_exchange_client_list() {
    let (_broker, addr) = start_broker("default").await;
    let scope = Scope::new("default").unwrap();

    let mut a = TcpStream::connect(addr).await.unwrap();
    send_connect(&mut a, Cid::new([1; 16]), &scope, Uid::new(0x6574, 1), ClientType::Controller).await;
    let reply = read_one(&mut a).await;
    match reply.vector {
        RootVector::Broker(pdus) => match &pdus[0] {
            BrokerPdu::ConnectReply { code, .. } => assert_eq!(*code, ConnectStatusCode::Ok),
            other => panic!("expected ConnectReply, got {other:?}"),
        },
        other => panic!("expected broker vector, got {other:?}"),
    }

    let mut b = TcpStream::connect(addr).await.unwrap();
    send_connect(&mut b, Cid::new([2; 16]), &scope, Uid::new(0x6574, 2), ClientType::Controller).await;
    let _ = read_one(&mut b).await; // b's own ConnectReply

    // a should see a ClientAdd for b.
    let add = read_one(&mut a).await;
    match add.vector {
        RootVector::Broker(pdus) => match &pdus[0] {
            BrokerPdu::ClientAdd { client_entries } => {
                assert_eq!(client_entries[0].cid, Cid::new([2; 16]));
            }
            other => panic!("expected ClientAdd, got {other:?}"),
        },
        other => panic!("expected broker vector, got {other:?}"),
    }

    let fetch = encode(Cid::new([1; 16]), RootVector::Broker(vec![BrokerPdu::FetchClientList]));
    a.write_all(&fetch).await.unwrap();
    let list = read_one(&mut a).await;
    match list.vector {
        RootVector::Broker(pdus) => match &pdus[0] {
            BrokerPdu::ConnectedClientList { client_entries } => {
                assert_eq!(client_entries.len(), 2);
            }
            other => panic!("expected ConnectedClientList, got {other:?}"),
        },
        other => panic!("expected broker vector, got {other:?}"),
    }
}

#[tokio::test]
async fn request_is_routed_to_device() {
    let (_broker, addr) = start_broker("default").await;
    let scope = Scope::new("default").unwrap();

    let mut controller = TcpStream::connect(addr).await.unwrap();
    send_connect(&mut controller, Cid::new([1; 16]), &scope, Uid::new(0x6574, 1), ClientType::Controller).await;
    let _ = read_one(&mut controller).await;

    let mut device = TcpStream::connect(addr).await.unwrap();
    send_connect(&mut device, Cid::new([2; 16]), &scope, Uid::new(0x6574, 2), ClientType::Device).await;
    let _ = read_one(&mut device).await;

    let header = RptHeader {
        source_uid: Uid::new(0x6574, 1),
        source_endpoint: 0,
        dest_uid: Uid::new(0x6574, 2),
        dest_endpoint: 0,
        seqnum: 7,
    };
    let pdu = RptPdu {
        header: Some(header),
        vector: RptVector::Request(RdmCommandBuffer::new(vec![0xAA; 26]).unwrap()),
    };
    let bytes = encode(Cid::new([1; 16]), RootVector::Rpt(vec![pdu]));
    controller.write_all(&bytes).await.unwrap();

    let received = read_one(&mut device).await;
    match received.vector {
        RootVector::Rpt(pdus) => {
            assert_eq!(pdus[0].header.unwrap().seqnum, 7);
        }
        other => panic!("expected rpt vector, got {other:?}"),
    }
}

#[tokio::test]
async fn request_to_unknown_uid_gets_status_back() {
    let (_broker, addr) = start_broker("default").await;
    let scope = Scope::new("default").unwrap();

    let mut controller = TcpStream::connect(addr).await.unwrap();
    send_connect(&mut controller, Cid::new([1; 16]), &scope, Uid::new(0x6574, 1), ClientType::Controller).await;
    let _ = read_one(&mut controller).await;

    let header = RptHeader {
        source_uid: Uid::new(0x6574, 1),
        source_endpoint: 0,
        dest_uid: Uid::new(0x6574, 99),
        dest_endpoint: 0,
        seqnum: 1,
    };
    let pdu = RptPdu {
        header: Some(header),
        vector: RptVector::Request(RdmCommandBuffer::new(vec![0xAA; 26]).unwrap()),
    };
    let bytes = encode(Cid::new([1; 16]), RootVector::Rpt(vec![pdu]));
    controller.write_all(&bytes).await.unwrap();

    let reply = read_one(&mut controller).await;
    match reply.vector {
        RootVector::Rpt(pdus) => match &pdus[0].vector {
            RptVector::Status { code, .. } => assert_eq!(*code, RptStatusCode::UnknownRdmUid),
            other => panic!("expected status, got {other:?}"),
        },
        other => panic!("expected rpt vector, got {other:?}"),
    }
}

#[tokio::test]
async fn scope_mismatch_gets_disconnected() {
    let (_broker, addr) = start_broker("backstage").await;
    let wrong_scope = Scope::new("front-of-house").unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    send_connect(&mut client, Cid::new([1; 16]), &wrong_scope, Uid::new(0x6574, 1), ClientType::Controller).await;

    let reply = read_one(&mut client).await;
    match reply.vector {
        RootVector::Broker(pdus) => match &pdus[0] {
            BrokerPdu::ConnectReply { code, .. } => {
                assert_eq!(*code, ConnectStatusCode::ScopeMismatch);
            }
            other => panic!("expected ConnectReply, got {other:?}"),
        },
        other => panic!("expected broker vector, got {other:?}"),
    }

    // The broker should also close the socket after the rejection reply.
    let mut buf = [0u8; 16];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "broker should close the connection after a scope mismatch");
}

#[tokio::test]
async fn capacity_exceeded_gets_disconnected() {
    let (_broker, addr) = start_broker_with("default", |c| c.max_controllers = 1).await;
    let scope = Scope::new("default").unwrap();

    let mut first = TcpStream::connect(addr).await.unwrap();
    send_connect(&mut first, Cid::new([1; 16]), &scope, Uid::new(0x6574, 1), ClientType::Controller).await;
    let _ = read_one(&mut first).await;

    let mut second = TcpStream::connect(addr).await.unwrap();
    send_connect(&mut second, Cid::new([2; 16]), &scope, Uid::new(0x6574, 2), ClientType::Controller).await;

    let reply = read_one(&mut second).await;
    match reply.vector {
        RootVector::Broker(pdus) => match &pdus[0] {
            BrokerPdu::ConnectReply { code, .. } => {
                assert_eq!(*code, ConnectStatusCode::Capacity);
            }
            other => panic!("expected ConnectReply, got {other:?}"),
        },
        other => panic!("expected broker vector, got {other:?}"),
    }

    let mut buf = [0u8; 16];
    let n = second.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "broker should close the connection after a capacity rejection");
}

#[tokio::test]
async fn disconnecting_client_produces_exactly_one_client_remove() {
    let (broker, addr) = start_broker("default").await;
    let scope = Scope::new("default").unwrap();

    let mut survivor = TcpStream::connect(addr).await.unwrap();
    send_connect(&mut survivor, Cid::new([1; 16]), &scope, Uid::new(0x6574, 1), ClientType::Controller).await;
    let _ = read_one(&mut survivor).await;

    {
        let mut leaving = TcpStream::connect(addr).await.unwrap();
        send_connect(&mut leaving, Cid::new([2; 16]), &scope, Uid::new(0x6574, 2), ClientType::Controller).await;
        let _ = read_one(&mut leaving).await;
        let _add = read_one(&mut survivor).await; // ClientAdd for the second controller
    } // socket dropped here

    assert_eq!(broker.controller_count().await, 2); // sweep hasn't run yet

    let remove = read_one(&mut survivor).await;
    match remove.vector {
        RootVector::Broker(pdus) => match &pdus[0] {
            BrokerPdu::ClientRemove { client_entries } => {
                assert_eq!(client_entries.len(), 1);
                assert_eq!(client_entries[0].cid, Cid::new([2; 16]));
            }
            other => panic!("expected ClientRemove, got {other:?}"),
        },
        other => panic!("expected broker vector, got {other:?}"),
    }
}
