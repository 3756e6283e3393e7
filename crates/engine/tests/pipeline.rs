//! End-to-end tests driving a full application run.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    doozer::{
        Application, CallbackError, ChannelConsumer, Consumer, IterConsumer, Message, ReadError,
    },
    serde_json::{Value, json},
    tokio_util::sync::CancellationToken,
};

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

fn record(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap_or_else(|e| e.into_inner()).push(entry.into());
}

fn text(value: &Value) -> String {
    value.as_str().map_or_else(|| value.to_string(), str::to_owned)
}

/// An application echoing each payload as its single result.
fn echo_app(messages: impl IntoIterator<Item = Message>) -> Application {
    let mut app = Application::new("pipeline").with_consumer(IterConsumer::new(messages));
    app.processor_fn(|_, message| {
        let payload = message.payload.clone();
        Box::pin(async move { Ok(vec![payload]) })
    });
    app
}

fn log_acks(app: &mut Application, log: &Log) {
    let log = Arc::clone(log);
    app.message_acknowledgement(move |_, message| {
        record(&log, format!("ack:{}", text(&message.payload)));
        Box::pin(async { Ok(()) })
    });
}

fn log_teardown(app: &mut Application, log: &Log) {
    let log = Arc::clone(log);
    app.teardown(move |_| {
        record(&log, "teardown");
        Box::pin(async { Ok(()) })
    });
}

#[tokio::test]
async fn single_worker_acknowledges_in_order_then_tears_down() {
    let log = new_log();
    let mut app = echo_app([Message::new("A"), Message::new("B")]);
    {
        let log = Arc::clone(&log);
        app.startup(move |_| {
            record(&log, "startup");
            Box::pin(async { Ok(()) })
        });
    }
    log_acks(&mut app, &log);
    log_teardown(&mut app, &log);

    app.run_async(1, false).await.unwrap();

    assert_eq!(entries(&log), vec!["startup", "ack:A", "ack:B", "teardown"]);
}

#[test]
fn blocking_run_drives_its_own_runtime() {
    let log = new_log();
    let mut app = echo_app([Message::new("only")]);
    log_acks(&mut app, &log);
    log_teardown(&mut app, &log);

    app.run(2, false).unwrap();

    assert_eq!(entries(&log), vec!["ack:only", "teardown"]);
}

#[tokio::test]
async fn acknowledgement_sees_the_pre_processing_snapshot() {
    let log = new_log();
    let mut app = echo_app([Message::new("raw").with_metadata("source", "test")]);
    app.message_preprocessor(|_, mut message| {
        message.payload = json!("cooked");
        message.metadata.insert("touched".into(), json!(true));
        Box::pin(async move { Ok(message) })
    });
    {
        let log = Arc::clone(&log);
        app.result_postprocessor(move |_, result| {
            record(&log, format!("result:{}", text(&result)));
            Box::pin(async move { Ok(result) })
        });
    }
    {
        let log = Arc::clone(&log);
        app.message_acknowledgement(move |_, message| {
            assert!(!message.metadata.contains_key("touched"));
            record(&log, format!("ack:{}", text(&message.payload)));
            Box::pin(async { Ok(()) })
        });
    }

    app.run_async(1, false).await.unwrap();

    assert_eq!(entries(&log), vec!["result:cooked", "ack:raw"]);
}

#[tokio::test]
async fn failure_runs_error_chain_in_order_and_acknowledges_once() {
    let log = new_log();
    let mut app = echo_app([Message::new("boom")]);
    app.processor_fn(|_, _| {
        Box::pin(async { Err(CallbackError::other(anyhow::anyhow!("processing failed"))) })
    });
    for name in ["first", "second"] {
        let log = Arc::clone(&log);
        app.error(move |_, message, failure| {
            record(
                &log,
                format!("{name}:{}:{}", text(&message.payload), failure.kind()),
            );
            Box::pin(async { Ok(()) })
        });
    }
    log_acks(&mut app, &log);

    app.run_async(1, false).await.unwrap();

    assert_eq!(entries(&log), vec![
        "first:boom:error",
        "second:boom:error",
        "ack:boom",
    ]);
}

#[tokio::test]
async fn abort_in_error_handler_stops_the_chain() {
    let log = new_log();
    let mut app = echo_app([Message::new("m")]);
    app.processor_fn(|_, _| Box::pin(async { Err(CallbackError::retryable(anyhow::anyhow!("flaky"))) }));
    {
        let log = Arc::clone(&log);
        app.error(move |_, _, _| {
            record(&log, "handled");
            Box::pin(async { Err(CallbackError::abort("message.handled")) })
        });
    }
    {
        let log = Arc::clone(&log);
        app.error(move |_, _, _| {
            record(&log, "never");
            Box::pin(async { Ok(()) })
        });
    }
    log_acks(&mut app, &log);

    app.run_async(1, false).await.unwrap();

    assert_eq!(entries(&log), vec!["handled", "ack:m"]);
}

#[tokio::test]
async fn abort_in_preprocessor_skips_processing_and_error_handlers() {
    let log = new_log();
    let processed = Arc::new(AtomicUsize::new(0));
    let mut app = echo_app([Message::new("skip"), Message::new("keep")]);
    app.message_preprocessor(|_, message| {
        Box::pin(async move {
            if message.payload == json!("skip") {
                return Err(CallbackError::abort("message.skipped"));
            }
            Ok(message)
        })
    });
    {
        let processed = Arc::clone(&processed);
        app.processor_fn(move |_, message| {
            processed.fetch_add(1, Ordering::SeqCst);
            let payload = message.payload.clone();
            Box::pin(async move { Ok(vec![payload]) })
        });
    }
    {
        let log = Arc::clone(&log);
        app.error(move |_, _, _| {
            record(&log, "error");
            Box::pin(async { Ok(()) })
        });
    }
    log_acks(&mut app, &log);

    app.run_async(1, false).await.unwrap();

    assert_eq!(processed.load(Ordering::SeqCst), 1);
    assert_eq!(entries(&log), vec!["ack:skip", "ack:keep"]);
}

#[tokio::test]
async fn preprocessor_failure_hands_snapshot_to_error_handlers() {
    let log = new_log();
    let mut app = echo_app([Message::new("original")]);
    app.message_preprocessor(|_, _| {
        Box::pin(async { Err(CallbackError::other(anyhow::anyhow!("bad input"))) })
    });
    {
        let log = Arc::clone(&log);
        app.error(move |_, message, failure| {
            record(
                &log,
                format!("error:{}:{}", text(&message.payload), failure.error()),
            );
            Box::pin(async { Ok(()) })
        });
    }
    log_acks(&mut app, &log);

    app.run_async(1, false).await.unwrap();

    assert_eq!(entries(&log), vec!["error:original:bad input", "ack:original"]);
}

#[tokio::test]
async fn postprocessing_handles_each_result_independently() {
    let log = new_log();
    let mut app = echo_app([Message::new("m")]);
    app.processor_fn(|_, _| Box::pin(async { Ok(vec![json!(1), json!(2), json!(3)]) }));
    app.result_postprocessor(|_, result| {
        Box::pin(async move {
            if result == json!(2) {
                return Err(CallbackError::abort("result.dropped"));
            }
            Ok(result)
        })
    });
    {
        let log = Arc::clone(&log);
        app.result_postprocessor(move |_, result| {
            record(&log, format!("result:{result}"));
            Box::pin(async move { Ok(result) })
        });
    }
    log_acks(&mut app, &log);

    app.run_async(1, false).await.unwrap();

    assert_eq!(entries(&log), vec!["result:1", "result:3", "ack:m"]);
}

#[tokio::test]
async fn postprocessor_failure_enters_error_chain() {
    let log = new_log();
    let mut app = echo_app([Message::new("m")]);
    app.result_postprocessor(|_, _| {
        Box::pin(async { Err(CallbackError::other(anyhow::anyhow!("cannot store"))) })
    });
    {
        let log = Arc::clone(&log);
        app.error(move |_, _, failure| {
            record(&log, format!("error:{}", failure.error()));
            Box::pin(async { Ok(()) })
        });
    }
    log_acks(&mut app, &log);

    app.run_async(1, false).await.unwrap();

    assert_eq!(entries(&log), vec!["error:cannot store", "ack:m"]);
}

#[tokio::test]
async fn many_workers_acknowledge_every_message_once() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let messages: Vec<Message> = (0..25).map(|n| Message::new(json!(n))).collect();
    let ids: HashSet<_> = messages.iter().map(|m| m.id).collect();
    let mut app = echo_app(messages);
    {
        let seen = Arc::clone(&seen);
        app.message_acknowledgement(move |_, message| {
            seen.lock().unwrap().push(message.id);
            Box::pin(async { Ok(()) })
        });
    }

    app.run_async(4, false).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 25);
    assert_eq!(seen.iter().copied().collect::<HashSet<_>>(), ids);
}

#[tokio::test]
async fn shutdown_token_stops_intake_and_runs_teardown() {
    let log = new_log();
    let (consumer, resubmitter) = ChannelConsumer::new();
    for payload in ["one", "two"] {
        resubmitter.submit(Message::new(payload)).unwrap();
    }

    let mut app = Application::new("shutdown").with_consumer(consumer);
    app.processor_fn(|_, _| Box::pin(async { Ok(vec![]) }));
    let shutdown = app.shutdown_token();
    let acked = Arc::new(AtomicUsize::new(0));
    {
        let acked = Arc::clone(&acked);
        app.message_acknowledgement(move |_, _| {
            if acked.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                shutdown.cancel();
            }
            Box::pin(async { Ok(()) })
        });
    }
    log_teardown(&mut app, &log);

    // The resubmitter stays alive, so only the token can end the run.
    app.run_async(1, false).await.unwrap();

    assert_eq!(acked.load(Ordering::SeqCst), 2);
    assert_eq!(entries(&log), vec!["teardown"]);
    drop(resubmitter);
}

#[tokio::test]
async fn failing_acknowledgement_shuts_down_gracefully() {
    let log = new_log();
    let (consumer, resubmitter) = ChannelConsumer::new();
    resubmitter.submit(Message::new("first")).unwrap();

    let mut app = Application::new("fatal").with_consumer(consumer);
    app.processor_fn(|_, _| Box::pin(async { Ok(vec![]) }));
    log_acks(&mut app, &log);
    app.message_acknowledgement(|_, _| {
        Box::pin(async { Err(CallbackError::other(anyhow::anyhow!("broker gone"))) })
    });
    log_teardown(&mut app, &log);

    app.run_async(1, false).await.unwrap();

    let log = entries(&log);
    assert_eq!(log.first().map(String::as_str), Some("ack:first"));
    assert_eq!(log.last().map(String::as_str), Some("teardown"));
    drop(resubmitter);
}

struct FailsAfterOne {
    served: AtomicUsize,
}

#[async_trait]
impl Consumer for FailsAfterOne {
    async fn read(&self) -> Result<Message, ReadError> {
        if self.served.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(Message::new("before failure"))
        } else {
            Err(anyhow::anyhow!("connection reset").into())
        }
    }
}

#[tokio::test]
async fn consumer_failure_drains_queue_before_teardown() {
    let log = new_log();
    let mut app = Application::new("flaky-source").with_consumer(FailsAfterOne {
        served: AtomicUsize::new(0),
    });
    app.processor_fn(|_, _| Box::pin(async { Ok(vec![]) }));
    log_acks(&mut app, &log);
    log_teardown(&mut app, &log);

    app.run_async(2, false).await.unwrap();

    assert_eq!(entries(&log), vec!["ack:before failure", "teardown"]);
}

#[tokio::test]
async fn failing_teardown_hook_does_not_fail_the_run() {
    let log = new_log();
    let mut app = echo_app([]);
    app.teardown(|_| Box::pin(async { Err(CallbackError::other(anyhow::anyhow!("close failed"))) }));
    log_teardown(&mut app, &log);

    app.run_async(1, false).await.unwrap();

    assert_eq!(entries(&log), vec!["teardown"]);
}

/// Requests shutdown while serving its only message.
struct CancelsWhileReading {
    shutdown: CancellationToken,
    reads: AtomicUsize,
}

#[async_trait]
impl Consumer for CancelsWhileReading {
    async fn read(&self) -> Result<Message, ReadError> {
        if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
            self.shutdown.cancel();
            Ok(Message::new("in-hand"))
        } else {
            Err(ReadError::EndOfStream)
        }
    }
}

#[tokio::test]
async fn message_read_during_shutdown_is_still_acknowledged() {
    let log = new_log();
    let mut app = echo_app([]);
    let shutdown = app.shutdown_token();
    app.set_consumer(CancelsWhileReading {
        shutdown,
        reads: AtomicUsize::new(0),
    });
    log_acks(&mut app, &log);
    log_teardown(&mut app, &log);

    app.run_async(2, false).await.unwrap();

    assert_eq!(entries(&log), vec!["ack:in-hand", "teardown"]);
}

/// Tracks how many messages have been read but not yet acknowledged.
struct InFlight {
    inner: IterConsumer,
    reads: Arc<AtomicUsize>,
    acked: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Consumer for InFlight {
    async fn read(&self) -> Result<Message, ReadError> {
        let message = self.inner.read().await?;
        let read = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        let in_flight = read - self.acked.load(Ordering::SeqCst);
        self.peak.fetch_max(in_flight, Ordering::SeqCst);
        Ok(message)
    }
}

#[tokio::test]
async fn queue_holds_one_message_per_worker() {
    const WORKERS: usize = 3;
    let reads = Arc::new(AtomicUsize::new(0));
    let acked = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut app = Application::new("backpressure").with_consumer(InFlight {
        inner: IterConsumer::new((0..20).map(|n| Message::new(json!(n)))),
        reads: Arc::clone(&reads),
        acked: Arc::clone(&acked),
        peak: Arc::clone(&peak),
    });
    app.processor_fn(|_, _| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(vec![])
        })
    });
    {
        let acked = Arc::clone(&acked);
        app.message_acknowledgement(move |_, _| {
            acked.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        });
    }

    app.run_async(WORKERS, false).await.unwrap();

    assert_eq!(acked.load(Ordering::SeqCst), 20);
    // One message per worker, one per queue slot and the one being pushed.
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak > WORKERS, "queue never buffered: peak {peak}");
    assert!(peak <= 2 * WORKERS + 1, "queue overfilled: peak {peak}");
}
