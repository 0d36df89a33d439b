//! End-to-end retry flow across producer, consumer and retry scheduler.

use std::{sync::Arc, time::Duration};

use airqod_core::{Clock, FailureKind, MemoryStorage, RecordStatus, RecordStore};
use airqod_dispatch::{
    ClaimSet, DeliveryExecutor, DestinationResolver, DispatchProducer, DispatchWorker,
    ExecutorConfig, RetryConfig, RetryScheduler,
};
use airqod_testing::{profile, RecordBuilder, TestEnv};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

struct Pipeline {
    store: Arc<MemoryStorage>,
    producer: DispatchProducer,
    worker: DispatchWorker,
    scheduler: RetryScheduler,
    rx: Arc<Mutex<mpsc::Receiver<airqod_core::RecordId>>>,
}

fn pipeline(env: &TestEnv, destination_url: &str, executor: ExecutorConfig) -> Pipeline {
    let claims = ClaimSet::new();
    let token = CancellationToken::new();
    let (tx, rx) = mpsc::channel(16);
    let rx = Arc::new(Mutex::new(rx));

    let resolver = Arc::new(DestinationResolver::new(vec![profile("dhis2", destination_url)]));

    let producer = DispatchProducer::new(
        env.storage.clone(),
        claims.clone(),
        tx,
        env.clock.clone(),
        token.clone(),
        Duration::from_millis(10),
        32,
    );
    let worker = DispatchWorker::new(
        0,
        env.storage.clone(),
        resolver,
        Arc::new(DeliveryExecutor::new(executor).unwrap()),
        claims.clone(),
        rx.clone(),
        env.clock.clone(),
        token.clone(),
    );
    let scheduler = RetryScheduler::new(
        env.storage.clone(),
        claims,
        env.clock.clone(),
        token,
        RetryConfig::default(),
    );

    Pipeline { store: env.storage.clone(), producer, worker, scheduler, rx }
}

async fn drive_one(p: &mut Pipeline) {
    assert_eq!(p.producer.scan_once().await.unwrap(), 1);
    let id = p.rx.lock().await.recv().await.unwrap();
    p.worker.handle(id).await;
}

#[tokio::test]
async fn timed_out_delivery_succeeds_on_the_retry_pass() {
    let destination = MockServer::start().await;

    // First request stalls past the executor deadline, later ones answer
    // promptly.
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .up_to_n_times(1)
        .mount(&destination)
        .await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"response":{"id":"sub-3"}}"#))
        .mount(&destination)
        .await;

    let env = TestEnv::new();
    let mut p = pipeline(
        &env,
        &destination.uri(),
        ExecutorConfig { timeout: Duration::from_millis(200), ..Default::default() },
    );
    let record = env.insert_record(RecordBuilder::with_defaults()).await;

    // First pass times out and the record lands in Failed with one attempt
    // spent.
    drive_one(&mut p).await;
    let stored = p.store.find_record(record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RecordStatus::Failed);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.destination_results["dhis2"].error_kind, Some(FailureKind::Timeout));

    // The sweep re-queues it, and the second pass lands the delivery.
    assert_eq!(p.scheduler.sweep_once().await.unwrap(), 1);
    drive_one(&mut p).await;

    let stored = p.store.find_record(record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RecordStatus::Succeeded);
    assert_eq!(stored.attempts, 2);
    assert_eq!(stored.submission_id.as_deref(), Some("sub-3"));
}

#[tokio::test]
async fn rejected_delivery_is_never_swept_back() {
    let destination = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad payload"))
        .expect(1)
        .mount(&destination)
        .await;

    let env = TestEnv::new();
    let mut p = pipeline(&env, &destination.uri(), ExecutorConfig::default());
    let record = env.insert_record(RecordBuilder::with_defaults()).await;

    drive_one(&mut p).await;
    let stored = p.store.find_record(record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RecordStatus::Failed);
    assert_eq!(stored.destination_results["dhis2"].error_kind, Some(FailureKind::Rejected));

    // A rejection repeats identically, so the sweep leaves the record
    // where it is.
    assert_eq!(p.scheduler.sweep_once().await.unwrap(), 0);
    assert_eq!(p.producer.scan_once().await.unwrap(), 0);

    let stored = p.store.find_record(record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RecordStatus::Failed);
    assert_eq!(stored.attempts, 1);
}

#[tokio::test]
async fn in_flight_record_left_by_a_crash_is_redelivered() {
    let destination = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&destination)
        .await;

    let env = TestEnv::new();
    let record = env.insert_record(RecordBuilder::with_defaults()).await;
    env.storage
        .set_status(record.id, RecordStatus::InFlight, env.clock.now_utc())
        .await
        .unwrap();

    // Everything rebuilt over the same store, as after a process restart:
    // the claim set starts out empty.
    let mut p = pipeline(&env, &destination.uri(), ExecutorConfig::default());

    // The pending scan alone cannot see the orphan.
    assert_eq!(p.producer.scan_once().await.unwrap(), 0);

    // The sweep resets it, then an ordinary pass lands the delivery.
    assert_eq!(p.scheduler.sweep_once().await.unwrap(), 1);
    drive_one(&mut p).await;

    let stored = p.store.find_record(record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RecordStatus::Succeeded);
    assert_eq!(stored.attempts, 1);
}

#[tokio::test]
async fn dependent_record_dispatches_only_after_its_parent() {
    let destination = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&destination)
        .await;

    let env = TestEnv::new();
    let mut p = pipeline(&env, &destination.uri(), ExecutorConfig::default());

    let parent = env.insert_record(RecordBuilder::with_defaults()).await;
    let child =
        env.insert_record(RecordBuilder::with_defaults().depends_on(parent.id)).await;

    // Only the parent is eligible on the first scan.
    assert_eq!(p.producer.scan_once().await.unwrap(), 1);
    let id = p.rx.lock().await.recv().await.unwrap();
    assert_eq!(id, parent.id);
    p.worker.handle(id).await;

    // With the parent succeeded, the child goes out on the next scan.
    drive_one(&mut p).await;
    let stored = p.store.find_record(child.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RecordStatus::Succeeded);
}
