//! Transport behavior against an in-process mock of the `/cs` endpoint:
//! sequence-number discipline, retry/backoff, service-code mapping, and
//! the 402 hashcash flow.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;

use mega_api::{hashcash, Transport};
use mega_core::{ClientConfig, Error};

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn transport_for(addr: SocketAddr) -> Transport {
    let config = ClientConfig {
        api_url: format!("http://{addr}"),
        ..Default::default()
    };
    Transport::new(&config).unwrap()
}

#[derive(serde::Serialize)]
struct Ping {
    a: &'static str,
}

const PING: Ping = Ping { a: "ug" };

#[tokio::test(flavor = "multi_thread")]
async fn sequence_numbers_are_unique_and_consecutive() {
    let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
    let app = Router::new()
        .route(
            "/cs",
            post(
                |State(seen): State<Arc<Mutex<Vec<u64>>>>,
                 Query(params): Query<HashMap<String, String>>| async move {
                    let id: u64 = params["id"].parse().unwrap();
                    seen.lock().unwrap().push(id);
                    r#"[{"ok":1}]"#
                },
            ),
        )
        .with_state(seen.clone());
    let addr = serve(app).await;
    let transport = Arc::new(transport_for(addr));

    let calls = 8;
    let mut handles = Vec::new();
    for _ in 0..calls {
        let t = transport.clone();
        handles.push(tokio::spawn(async move {
            t.request::<_, serde_json::Value>(&PING).await.unwrap()
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let mut ids = seen.lock().unwrap().clone();
    ids.sort_unstable();
    assert_eq!(ids.len(), calls);
    // the observed multiset is exactly {base, base+1, .., base+calls-1}
    for pair in ids.windows(2) {
        assert_eq!(pair[1], pair[0] + 1, "ids must be consecutive: {ids:?}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn retries_reuse_the_sequence_number_on_eagain() {
    #[derive(Default)]
    struct Hits {
        count: AtomicU32,
        ids: Mutex<Vec<u64>>,
    }
    let hits = Arc::new(Hits::default());
    let app = Router::new()
        .route(
            "/cs",
            post(
                |State(hits): State<Arc<Hits>>,
                 Query(params): Query<HashMap<String, String>>| async move {
                    hits.ids
                        .lock()
                        .unwrap()
                        .push(params["id"].parse().unwrap());
                    if hits.count.fetch_add(1, Ordering::SeqCst) < 2 {
                        "-3".to_string()
                    } else {
                        r#"[{"ok":1}]"#.to_string()
                    }
                },
            ),
        )
        .with_state(hits.clone());
    let addr = serve(app).await;

    let transport = transport_for(addr);
    transport
        .request::<_, serde_json::Value>(&PING)
        .await
        .expect("third attempt succeeds");

    assert_eq!(hits.count.load(Ordering::SeqCst), 3);
    let ids = hits.ids.lock().unwrap();
    assert!(
        ids.windows(2).all(|w| w[0] == w[1]),
        "retries must reuse the sn: {ids:?}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn fatal_service_codes_map_and_do_not_retry() {
    let hits = Arc::new(AtomicU32::new(0));
    let app = Router::new()
        .route(
            "/cs",
            post(|State(hits): State<Arc<AtomicU32>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                "[-9]"
            }),
        )
        .with_state(hits.clone());
    let addr = serve(app).await;

    let transport = transport_for(addr);
    let err = transport
        .request::<_, serde_json::Value>(&PING)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound));
    assert_eq!(hits.load(Ordering::SeqCst), 1, "fatal errors never retry");
}

#[tokio::test(flavor = "multi_thread")]
async fn non_json_body_is_a_bad_response() {
    let app = Router::new().route("/cs", post(|| async { "<html>boom</html>" }));
    let addr = serve(app).await;

    let transport = transport_for(addr);
    let err = transport
        .request::<_, serde_json::Value>(&PING)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BadResponse(_)), "got {err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn payment_required_triggers_the_hashcash_flow() {
    // bytes 0..=15, easiness 255 so the solve completes instantly
    const TOKEN: &str = "AAECAwQFBgcICQoLDA0ODw";

    #[derive(Default)]
    struct Gate {
        solutions: Mutex<Vec<String>>,
    }
    let gate = Arc::new(Gate::default());
    let app = Router::new()
        .route(
            "/cs",
            post(
                |State(gate): State<Arc<Gate>>, headers: HeaderMap| async move {
                    match headers.get("X-Hashcash") {
                        None => (
                            StatusCode::PAYMENT_REQUIRED,
                            [("X-Hashcash", format!("1:255:1712345678:{TOKEN}"))],
                            String::new(),
                        )
                            .into_response(),
                        Some(solution) => {
                            gate.solutions
                                .lock()
                                .unwrap()
                                .push(solution.to_str().unwrap().to_string());
                            r#"[{"ok":1}]"#.into_response()
                        }
                    }
                },
            ),
        )
        .with_state(gate.clone());
    let addr = serve(app).await;

    let transport = transport_for(addr);
    transport
        .request::<_, serde_json::Value>(&PING)
        .await
        .expect("solved challenge unlocks the call");

    let solutions = gate.solutions.lock().unwrap();
    assert_eq!(solutions.len(), 1);
    let mut parts = solutions[0].splitn(3, ':');
    assert_eq!(parts.next(), Some("1"));
    assert_eq!(parts.next(), Some(TOKEN));
    let prefix = parts.next().expect("prefix present");
    assert!(hashcash::verify(TOKEN, 255, prefix).unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn session_id_rides_the_query_string() {
    let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::default();
    let app = Router::new()
        .route(
            "/cs",
            post(
                |State(seen): State<Arc<Mutex<Vec<Option<String>>>>>,
                 Query(params): Query<HashMap<String, String>>| async move {
                    seen.lock().unwrap().push(params.get("sid").cloned());
                    r#"[{"ok":1}]"#
                },
            ),
        )
        .with_state(seen.clone());
    let addr = serve(app).await;

    let transport = transport_for(addr);
    transport
        .request::<_, serde_json::Value>(&PING)
        .await
        .unwrap();
    transport.set_session_id(Some("SID123".into()));
    transport
        .request::<_, serde_json::Value>(&PING)
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], None);
    assert_eq!(seen[1].as_deref(), Some("SID123"));
}
