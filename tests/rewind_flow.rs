//! Edit and regenerate through the engine facade

mod common;

use chat_engine::conversation::{Conversation, Role, Turn, TurnStatus};
use chat_engine::error::ChatError;
use chat_engine::media::dispatch::DispatchError;
use chat_engine::session::NoopCallbacks;
use common::Harness;
use std::sync::Arc;

fn stored(turn: Turn, row: &str) -> Turn {
    turn.with_persisted_id(Some(row.to_string()))
}

fn five_turns() -> Conversation {
    Conversation::new("gpt").with_turns(vec![
        stored(Turn::user("What is Rust?"), "db-1"),
        stored(Turn::assistant("A systems language.", "gpt"), "db-2"),
        stored(Turn::user("Who maintains it?"), "db-3"),
        stored(Turn::assistant("The Rust project.", "gpt"), "db-4"),
        stored(Turn::user("Is it fast?"), "db-5"),
    ])
}

#[tokio::test(start_paused = true)]
async fn test_edit_truncates_and_regenerates() {
    let h = Harness::new();
    let conversation = five_turns();
    h.engine.open_conversation(&conversation).await;
    let target = conversation.turns[2].id.clone();

    let handle = h
        .engine
        .edit(&target, "Who funds it?", Arc::new(NoopCallbacks))
        .await
        .unwrap()
        .unwrap();

    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.turns.len(), 3);
    assert_eq!(&snapshot.turns[..2], &conversation.turns[..2]);
    assert_eq!(snapshot.turns[2].id, target);
    assert_eq!(snapshot.turns[2].text, "Who funds it?");
    assert!(snapshot.turns[2].persisted_id.is_none());

    h.transport.wait_for_calls(1).await;
    let request = h.transport.request(0);
    assert_eq!(request.turns.len(), 3);
    assert_eq!(request.turns[2].text, "Who funds it?");

    h.transport.done(0, "The Rust Foundation.");
    handle.wait().await.unwrap();

    let turns = h.engine.snapshot().turns;
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[3].role, Role::Assistant);
    assert_eq!(turns[3].text, "The Rust Foundation.");

    assert_eq!(h.persistence.truncations(), vec![(conversation.id.clone(), 2)]);
    assert_eq!(h.persistence.texts(Role::User), vec!["Who funds it?"]);
}

#[tokio::test(start_paused = true)]
async fn test_regenerate_replaces_last_reply() {
    let h = Harness::new();
    let mut conversation = five_turns();
    conversation.turns.truncate(4);
    h.engine.open_conversation(&conversation).await;
    let reply = conversation.turns[3].id.clone();

    let handle = h
        .engine
        .regenerate(&reply, Arc::new(NoopCallbacks))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.engine.snapshot().turns, conversation.turns[..3].to_vec());

    h.transport.wait_for_calls(1).await;
    let request = h.transport.request(0);
    let texts: Vec<&str> = request.turns.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(
        texts,
        vec!["What is Rust?", "A systems language.", "Who maintains it?"]
    );

    h.transport.done(0, "Its teams and the Foundation.");
    handle.wait().await.unwrap();

    let turns = h.engine.snapshot().turns;
    assert_eq!(turns.len(), 4);
    assert_ne!(turns[3].id, reply);
    assert_eq!(turns[3].text, "Its teams and the Foundation.");
    assert_eq!(h.persistence.truncations(), vec![(conversation.id.clone(), 3)]);
}

#[tokio::test(start_paused = true)]
async fn test_rewind_rejected_while_streaming() {
    let h = Harness::new();
    let conversation = five_turns();
    h.engine.open_conversation(&conversation).await;

    let _handle = h
        .engine
        .send("Tell me more", Vec::new(), Arc::new(NoopCallbacks))
        .await
        .unwrap()
        .unwrap();
    let before = h.engine.snapshot().turns;

    let edit = h
        .engine
        .edit(&conversation.turns[2].id, "changed", Arc::new(NoopCallbacks))
        .await;
    let regenerate = h
        .engine
        .regenerate(&conversation.turns[3].id, Arc::new(NoopCallbacks))
        .await;

    assert!(matches!(edit, Err(ChatError::SessionActive(_))));
    assert!(matches!(regenerate, Err(ChatError::SessionActive(_))));
    assert_eq!(h.engine.snapshot().turns, before);
    assert!(h.persistence.truncations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_edit_of_assistant_turn_leaves_transcript_untouched() {
    let h = Harness::new();
    let conversation = five_turns();
    h.engine.open_conversation(&conversation).await;

    let result = h
        .engine
        .edit(&conversation.turns[1].id, "rewritten", Arc::new(NoopCallbacks))
        .await;

    assert!(matches!(result, Err(ChatError::InvalidRewindTarget(_))));
    assert_eq!(h.engine.snapshot().turns, conversation.turns);
    assert_eq!(h.transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_regenerate_of_earlier_reply_is_rejected() {
    let h = Harness::new();
    let mut conversation = five_turns();
    conversation.turns.truncate(4);
    h.engine.open_conversation(&conversation).await;

    let result = h
        .engine
        .regenerate(&conversation.turns[1].id, Arc::new(NoopCallbacks))
        .await;

    assert!(matches!(result, Err(ChatError::InvalidRewindTarget(_))));
    assert_eq!(h.engine.snapshot().turns, conversation.turns);
    assert!(h.persistence.truncations().is_empty());
    assert_eq!(h.transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_edit_after_failed_media_turn_truncates_stored_rows() {
    let h = Harness::new();
    let conversation = Conversation::new("gpt");
    h.engine.open_conversation(&conversation).await;

    h.engine.select_model("painter").unwrap();
    h.dispatch
        .next_job(Err(DispatchError::RequestFailed("quota".to_string())));
    let drawn = h.engine.send("draw", Vec::new(), Arc::new(NoopCallbacks)).await;
    assert!(matches!(drawn, Err(ChatError::Dispatch(_))));

    h.engine.select_model("gpt").unwrap();
    let handle = h
        .engine
        .send("hi", Vec::new(), Arc::new(NoopCallbacks))
        .await
        .unwrap()
        .unwrap();
    h.transport.wait_for_calls(1).await;
    h.transport.done(0, "hello");
    handle.wait().await.unwrap();

    let turns = h.engine.snapshot().turns;
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[1].status, TurnStatus::Failed);
    assert!(turns[1].persisted_id.is_none());

    let handle = h
        .engine
        .edit(&turns[2].id, "hi edited", Arc::new(NoopCallbacks))
        .await
        .unwrap()
        .unwrap();
    h.transport.wait_for_calls(2).await;
    h.transport.done(1, "hello again");
    handle.wait().await.unwrap();

    // Storage held [draw, hi, hello]; only "draw" survives the edit
    assert_eq!(h.persistence.truncations(), vec![(conversation.id.clone(), 1)]);
    assert_eq!(h.persistence.texts(Role::User), vec!["draw", "hi", "hi edited"]);
}
