mod common;

use common::shared;
use serde_json::json;
use taskweave::comments::transactor::recount_reactions;
use taskweave::comments::{CommentTransactor, NewComment, Vote, VoteOutcome};
use taskweave::config::SyncConfig;
use taskweave::store::memory::InMemoryStore;
use taskweave::store::{DocPath, Patch};

async fn setup() -> (InMemoryStore, CommentTransactor, String) {
    let store = InMemoryStore::new();
    let tx = CommentTransactor::new(shared(&store), &SyncConfig::default());
    let id = tx
        .create_comment(NewComment::new("t1", "author", "first"))
        .await
        .expect("create");
    (store, tx, id)
}

#[tokio::test]
async fn like_then_dislike_then_dislike() {
    let (_store, tx, id) = setup().await;

    assert_eq!(
        tx.toggle_vote(&id, "u1", Vote::Like).await.unwrap(),
        VoteOutcome::Added(Vote::Like)
    );
    let c = tx.get_comment(&id).await.unwrap().unwrap();
    assert_eq!((c.like_count, c.dislike_count), (1, 0));
    assert_eq!(c.vote_of("u1"), Some(Vote::Like));

    assert_eq!(
        tx.toggle_vote(&id, "u1", Vote::Dislike).await.unwrap(),
        VoteOutcome::Switched {
            from: Vote::Like,
            to: Vote::Dislike
        }
    );
    let c = tx.get_comment(&id).await.unwrap().unwrap();
    assert_eq!((c.like_count, c.dislike_count), (0, 1));
    assert_eq!(c.vote_of("u1"), Some(Vote::Dislike));

    assert_eq!(
        tx.toggle_vote(&id, "u1", Vote::Dislike).await.unwrap(),
        VoteOutcome::Retracted(Vote::Dislike)
    );
    let c = tx.get_comment(&id).await.unwrap().unwrap();
    assert_eq!((c.like_count, c.dislike_count), (0, 0));
    assert_eq!(c.vote_of("u1"), None);
    assert!(c.voters.is_empty());
}

#[tokio::test]
async fn double_like_restores_the_original_state() {
    let (_store, tx, id) = setup().await;
    tx.toggle_vote(&id, "u2", Vote::Dislike).await.unwrap();
    let before = tx.get_comment(&id).await.unwrap().unwrap();

    tx.toggle_vote(&id, "u1", Vote::Like).await.unwrap();
    tx.toggle_vote(&id, "u1", Vote::Like).await.unwrap();

    let after = tx.get_comment(&id).await.unwrap().unwrap();
    assert_eq!(after.like_count, before.like_count);
    assert_eq!(after.dislike_count, before.dislike_count);
    assert_eq!(after.voters, before.voters);
}

#[tokio::test]
async fn counters_match_voters_across_users() {
    let (_store, tx, id) = setup().await;
    let votes = [
        ("u1", Vote::Like),
        ("u2", Vote::Like),
        ("u3", Vote::Dislike),
        ("u2", Vote::Dislike),
        ("u4", Vote::Like),
        ("u1", Vote::Like),
    ];
    for (user, vote) in votes {
        tx.toggle_vote(&id, user, vote).await.unwrap();
    }
    let c = tx.get_comment(&id).await.unwrap().unwrap();
    let likes = c.voters.values().filter(|v| **v == Vote::Like).count();
    let dislikes = c.voters.values().filter(|v| **v == Vote::Dislike).count();
    assert_eq!(c.like_count, i64::try_from(likes).unwrap());
    assert_eq!(c.dislike_count, i64::try_from(dislikes).unwrap());
    assert_eq!((c.like_count, c.dislike_count), (1, 2));
}

#[tokio::test]
async fn concurrent_vote_is_not_lost() {
    let (store, tx, id) = setup().await;
    // Another client likes the comment between our read and our commit.
    store.interfere_before_commit(
        DocPath::comment(&id),
        Patch::new()
            .set("voters", json!({ "u2": 1 }))
            .set("likeCount", 1),
    );

    let outcome = tx.toggle_vote(&id, "u1", Vote::Like).await.unwrap();
    assert_eq!(outcome, VoteOutcome::Added(Vote::Like));
    let c = tx.get_comment(&id).await.unwrap().unwrap();
    assert_eq!(c.like_count, 2);
    assert_eq!(c.vote_of("u1"), Some(Vote::Like));
    assert_eq!(c.vote_of("u2"), Some(Vote::Like));
}

#[tokio::test]
async fn reaction_counts_follow_reacting_users() {
    let (_store, tx, id) = setup().await;
    let first = tx.toggle_reaction(&id, "u1", "🎉").await.unwrap();
    assert!(first.added);
    assert_eq!(first.count, 1);
    tx.toggle_reaction(&id, "u2", "🎉").await.unwrap();
    tx.toggle_reaction(&id, "u2", "👍").await.unwrap();
    let off = tx.toggle_reaction(&id, "u1", "🎉").await.unwrap();
    assert!(!off.added);
    assert_eq!(off.count, 1);

    let c = tx.get_comment(&id).await.unwrap().unwrap();
    assert_eq!(c.reaction_counts, recount_reactions(&c));
    assert!(c.has_reacted("u2", "🎉"));
    assert!(!c.has_reacted("u1", "🎉"));
    assert_eq!(c.reaction_counts.get("👍"), Some(&1));

    tx.toggle_reaction(&id, "u2", "👍").await.unwrap();
    let c = tx.get_comment(&id).await.unwrap().unwrap();
    assert!(!c.reaction_counts.contains_key("👍"));
    assert!(!c.reaction_users.contains_key("👍"));
}

#[tokio::test]
async fn vote_on_missing_comment_fails_without_writing() {
    let (store, tx, _id) = setup().await;
    let before = store.writes().len();
    let err = tx.toggle_vote("gone", "u1", Vote::Like).await.unwrap_err();
    assert!(matches!(err, taskweave::TaskweaveError::CommentNotFound(id) if id == "gone"));
    assert_eq!(store.writes().len(), before);
}

#[tokio::test]
async fn concurrent_reaction_is_counted() {
    let (store, tx, id) = setup().await;
    tx.toggle_reaction(&id, "u3", "👍").await.unwrap();
    // Another client adds its reaction between our read and our commit.
    store.interfere_before_commit(
        DocPath::comment(&id),
        Patch::new()
            .set("reactionUsers", json!({ "🎉": { "u2": true }, "👍": { "u3": true } }))
            .set("reactionCounts", json!({ "🎉": 1, "👍": 1 })),
    );

    let outcome = tx.toggle_reaction(&id, "u1", "🎉").await.unwrap();
    assert!(outcome.added);
    assert_eq!(outcome.count, 2);

    let c = tx.get_comment(&id).await.unwrap().unwrap();
    assert!(c.has_reacted("u1", "🎉"));
    assert!(c.has_reacted("u2", "🎉"));
    assert_eq!(c.reaction_counts, recount_reactions(&c));
    assert_eq!(c.reaction_counts.get("🎉"), Some(&2));
    assert_eq!(c.reaction_counts.get("👍"), Some(&1));
}
