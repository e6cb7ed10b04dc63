use super::*;

#[tokio::test]
async fn printer_keeps_reading_after_falling_behind() {
    let (tx, mut rx) = broadcast::channel(2);
    for n in 0..5 {
        tx.send(FeedEvent::Error(format!("burst {n}")))
            .expect("send");
    }

    let event = next_event(&mut rx).await.expect("event after lag");
    assert!(matches!(event, FeedEvent::Error(message) if message == "burst 3"));
    let event = next_event(&mut rx).await.expect("event");
    assert!(matches!(event, FeedEvent::Error(message) if message == "burst 4"));

    tx.send(FeedEvent::StateChanged(FeedState::Live))
        .expect("send");
    assert!(matches!(
        next_event(&mut rx).await,
        Some(FeedEvent::StateChanged(FeedState::Live))
    ));

    drop(tx);
    assert!(next_event(&mut rx).await.is_none());
}
