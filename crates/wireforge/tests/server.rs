//! End-to-end tests running a real server and real clients over TCP
//! loopback.

use std::time::{Duration, Instant};

use wireforge::prelude::*;
use wireforge_protocol::Framer;
use wireforge_transport::{Connection, TcpConnection};

/// Routes log output through the test harness; `RUST_LOG` filters it.
/// Safe to call from every test, only the first init wins.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

fn test_server(max_clients: u16) -> Server {
    init_tracing();
    Server::new(ServerConfig {
        addr: "127.0.0.1:0".to_string(),
        max_clients,
        name: "test server".to_string(),
    })
}

/// Polls `cond` every 10ms for up to five seconds.
async fn wait_for(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn wait_for_count(server: &Server, count: usize) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if server.connected_ids().await.len() == count {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn routing_requires_a_started_server() {
    let server = test_server(4);
    let err = server.send_message(&[ClientId::BROADCAST], "hello").await;
    assert!(matches!(err, Err(WireforgeError::ServerNotOpen)));
    let err = server.remove_client(ClientId(1), "bye").await;
    assert!(matches!(err, Err(WireforgeError::ServerNotOpen)));
}

#[tokio::test]
async fn starting_twice_is_refused() {
    let server = test_server(4);
    server.start().await.unwrap();
    let err = server.start().await;
    assert!(matches!(err, Err(WireforgeError::ServerAlreadyOpen)));
    server.stop().await.unwrap();
}

#[tokio::test]
async fn ids_are_assigned_lowest_free_first() {
    let server = test_server(4);
    let addr = server.start().await.unwrap().to_string();

    let alice = Client::new();
    alice.connect(&addr, "alice").await.unwrap();
    assert_eq!(alice.id(), ClientId(1));

    let bob = Client::new();
    bob.connect(&addr, "bob").await.unwrap();
    assert_eq!(bob.id(), ClientId(2));

    alice.disconnect().await;
    assert!(wait_for_count(&server, 1).await);

    // The freed slot is reused before a higher one is opened.
    let carol = Client::new();
    carol.connect(&addr, "carol").await.unwrap();
    assert_eq!(carol.id(), ClientId(1));
}

#[tokio::test]
async fn a_full_server_refuses_with_a_reason() {
    let server = test_server(2);
    let addr = server.start().await.unwrap().to_string();

    let alice = Client::new();
    alice.connect(&addr, "alice").await.unwrap();
    let bob = Client::new();
    bob.connect(&addr, "bob").await.unwrap();

    let carol = Client::new();
    let err = carol.connect(&addr, "carol").await.unwrap_err();
    assert!(
        err.to_string().contains("Server is already full !"),
        "unexpected error: {err}"
    );
    assert!(!carol.is_connected());
}

#[tokio::test]
async fn a_taken_name_is_refused_with_a_reason() {
    let server = test_server(4);
    let addr = server.start().await.unwrap().to_string();

    let alice = Client::new();
    alice.connect(&addr, "alice").await.unwrap();

    let imposter = Client::new();
    let err = imposter.connect(&addr, "alice").await.unwrap_err();
    assert!(
        err.to_string()
            .contains("Another client with the same name already exist."),
        "unexpected error: {err}"
    );

    // The first binding survives.
    assert!(wait_for_count(&server, 1).await);
    assert_eq!(server.client_name(ClientId(1)).await.as_deref(), Some("alice"));
}

#[tokio::test]
async fn a_blank_pseudo_becomes_guest() {
    let server = test_server(4);
    let addr = server.start().await.unwrap().to_string();

    let client = Client::new();
    client.connect(&addr, "   ").await.unwrap();
    assert_eq!(client.pseudo(), "Guest");
    assert_eq!(server.client_name(client.id()).await.as_deref(), Some("Guest"));
}

#[tokio::test]
async fn joining_is_announced_to_earlier_clients() {
    let server = test_server(4);
    let addr = server.start().await.unwrap().to_string();

    let alice = Client::new();
    alice.connect(&addr, "alice").await.unwrap();
    let bob = Client::new();
    bob.connect(&addr, "bob").await.unwrap();

    assert!(
        wait_for(|| {
            alice
                .received_messages()
                .iter()
                .any(|m| m == "bob join the Server.")
        })
        .await
    );
    // The announcement also carries bob's identity.
    assert!(wait_for(|| alice.name_of(bob.id()).is_some()).await);
    assert_eq!(alice.name_of(bob.id()).as_deref(), Some("bob"));
    assert_eq!(alice.id_of("bob"), Some(bob.id()));
}

#[tokio::test]
async fn broadcast_skips_the_declared_sender() {
    let server = test_server(4);
    let addr = server.start().await.unwrap().to_string();

    let alice = Client::new();
    alice.connect(&addr, "alice").await.unwrap();
    let bob = Client::new();
    bob.connect(&addr, "bob").await.unwrap();

    let mut packet = Packet::new(bob.id(), ClientId::BROADCAST, names::MSG);
    packet.write_string("not for bob");
    server.send_packet(ClientId::BROADCAST, &mut packet).await.unwrap();

    assert!(
        wait_for(|| alice.received_messages().iter().any(|m| m == "not for bob"))
            .await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!bob.received_messages().iter().any(|m| m == "not for bob"));
}

#[tokio::test]
async fn a_unicast_chat_line_is_echoed_to_its_author() {
    let server = test_server(4);
    let addr = server.start().await.unwrap().to_string();

    let alice = Client::new();
    alice.connect(&addr, "alice").await.unwrap();
    let bob = Client::new();
    bob.connect(&addr, "bob").await.unwrap();

    alice.send_message(bob.id(), "psst").await.unwrap();

    let expected = "[alice] psst";
    assert!(
        wait_for(|| bob.received_messages().iter().any(|m| m == expected)).await
    );
    assert!(
        wait_for(|| alice.received_messages().iter().any(|m| m == expected))
            .await
    );
}

#[tokio::test]
async fn a_broadcast_chat_line_reaches_everyone() {
    let server = test_server(4);
    let addr = server.start().await.unwrap().to_string();

    let alice = Client::new();
    alice.connect(&addr, "alice").await.unwrap();
    let bob = Client::new();
    bob.connect(&addr, "bob").await.unwrap();

    alice.send_message(ClientId::BROADCAST, "hello all").await.unwrap();

    let expected = "[alice] hello all";
    assert!(
        wait_for(|| bob.received_messages().iter().any(|m| m == expected)).await
    );
    assert!(
        wait_for(|| alice.received_messages().iter().any(|m| m == expected))
            .await
    );
}

#[tokio::test]
async fn a_leaving_client_is_removed_everywhere() {
    let server = test_server(4);
    let addr = server.start().await.unwrap().to_string();

    let alice = Client::new();
    alice.connect(&addr, "alice").await.unwrap();
    let bob = Client::new();
    bob.connect(&addr, "bob").await.unwrap();
    let bob_id = bob.id();
    assert!(wait_for(|| alice.name_of(bob_id).is_some()).await);

    bob.disconnect().await;

    assert!(wait_for_count(&server, 1).await);
    assert_eq!(server.client_name(bob_id).await, None);
    // The clientDisconnect broadcast also clears alice's mirror.
    assert!(wait_for(|| alice.name_of(bob_id).is_none()).await);
}

#[tokio::test]
async fn stopping_the_server_tells_clients_why() {
    let server = test_server(4);
    let addr = server.start().await.unwrap().to_string();

    let alice = Client::new();
    alice.connect(&addr, "alice").await.unwrap();

    server.stop().await.unwrap();

    assert!(wait_for(|| !alice.is_connected()).await);
    assert_eq!(
        alice.last_disconnect_reason().as_deref(),
        Some("The server closed.")
    );
}

#[tokio::test]
async fn kicking_a_client_carries_the_reason() {
    let server = test_server(4);
    let addr = server.start().await.unwrap().to_string();

    let alice = Client::new();
    alice.connect(&addr, "alice").await.unwrap();

    server.remove_client(alice.id(), "You were kicked.").await.unwrap();

    assert!(wait_for(|| !alice.is_connected()).await);
    assert_eq!(
        alice.last_disconnect_reason().as_deref(),
        Some("You were kicked.")
    );
}

#[tokio::test]
async fn reconnecting_starts_a_fresh_session() {
    let server = test_server(4);
    let addr = server.start().await.unwrap().to_string();

    let client = Client::new();
    client.connect(&addr, "alice").await.unwrap();
    assert_eq!(client.id(), ClientId(1));
    client.disconnect().await;
    assert!(wait_for_count(&server, 0).await);

    // Someone else takes the freed id before the reconnect.
    let bob = Client::new();
    bob.connect(&addr, "bob").await.unwrap();
    assert_eq!(bob.id(), ClientId(1));

    client.connect(&addr, "carol").await.unwrap();
    assert_eq!(client.id(), ClientId(2));
    assert_eq!(client.pseudo(), "carol");
    // The mirror holds this session's binding for id 1, not last
    // session's.
    assert_eq!(client.name_of(ClientId(1)).as_deref(), Some("bob"));
    assert_eq!(client.id_of("alice"), None);

    // A ping still works after the reconnect.
    client.ping().await.unwrap();
    assert!(wait_for(|| client.last_rtt().is_some()).await);
}

#[tokio::test]
async fn ping_measures_a_round_trip() {
    let server = test_server(4);
    let addr = server.start().await.unwrap().to_string();

    let alice = Client::new();
    alice.connect(&addr, "alice").await.unwrap();
    assert_eq!(alice.last_rtt(), None);

    alice.ping().await.unwrap();
    assert!(wait_for(|| alice.last_rtt().is_some()).await);
}

#[tokio::test]
async fn an_unresolvable_query_gets_a_diagnostic() {
    let server = test_server(4);
    let addr = server.start().await.unwrap().to_string();

    let alice = Client::new();
    alice.connect(&addr, "alice").await.unwrap();

    alice.query(ClientId(42), "").await.unwrap();

    assert!(
        wait_for(|| {
            alice
                .received_messages()
                .iter()
                .any(|m| m.contains("No client matches the query"))
        })
        .await
    );
}

/// Drives the handshake by hand over a raw socket and checks the exact
/// packet sequence the server answers with.
#[tokio::test]
async fn the_handshake_sequence_is_ordered() {
    let server = test_server(4);
    let addr = server.start().await.unwrap().to_string();

    // An earlier client whose identity must be replayed to the newcomer.
    let alice = Client::new();
    alice.connect(&addr, "alice").await.unwrap();

    let conn = TcpConnection::connect(&addr).await.unwrap();
    let mut hello = Packet::new(ClientId::NULL, ClientId::SERVER, names::PSEUDO);
    hello.write_string("raw");
    hello.write_length();
    conn.send(hello.to_bytes()).await.unwrap();

    let mut framer = Framer::new();
    let mut received: Vec<Packet> = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    'read: while Instant::now() < deadline {
        let chunk = tokio::time::timeout(Duration::from_secs(5), conn.recv())
            .await
            .expect("handshake timed out")
            .unwrap()
            .expect("server closed the connection");
        for packet in framer.push(&chunk).unwrap() {
            let done = packet.name() == names::ALL_CONNECTION_DATA_SENT;
            received.push(packet);
            if done {
                break 'read;
            }
        }
    }

    assert_eq!(received.len(), 3);
    assert_eq!(received[0].name(), names::YOUR_ID);
    assert_eq!(received[0].target(), ClientId(2));
    assert_eq!(received[1].name(), names::ID_NAME);
    assert_eq!(received[1].read_u16().unwrap(), 1);
    assert_eq!(received[1].read_string().unwrap(), "alice");
    assert_eq!(received[2].name(), names::ALL_CONNECTION_DATA_SENT);
    assert_eq!(received[2].target(), ClientId(2));

    conn.close().await.unwrap();
}
