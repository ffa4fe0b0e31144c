//! Broadcaster behavior: change suppression, edit-rate budget, deferred
//! retry, repost-after-three-edits and stale-handle rediscovery.

mod common;

use chrono::Duration;
use common::{Harness, member, record, settle, t0};
use scrimd::chat::{ChannelId, ChatClient, GuildId, UserId};
use serde_json::json;

const GUILD: GuildId = GuildId(43);
const CHANNEL: ChannelId = ChannelId(1);
const BROADCAST: ChannelId = ChannelId(9);

fn settings() -> serde_json::Value {
    json!({
        "server": {"timezone": "UTC"},
        "channel_defaults": {"broadcast_channel": 9},
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn listing_publishes_and_suppresses_unchanged_content() {
    let harness = Harness::new();
    let guild = harness.guild(GUILD, settings()).await;
    let broadcaster = guild.broadcasters().into_iter().next().expect("broadcaster");
    broadcaster.set_retry_delay(std::time::Duration::from_millis(20));

    // Give the window some room; the budget is zero right after creation.
    harness.clock.advance(Duration::minutes(10));

    let thread = ChannelId(200);
    let content = harness.chat.seed_session_surface(CHANNEL, thread);
    guild
        .create_session(record(thread, CHANNEL, content, t0() + Duration::hours(100), 1))
        .await;
    settle().await;

    let draft = harness.chat.newest_draft(BROADCAST).expect("listing posted");
    assert_eq!(draft.cards.len(), 1);
    assert_eq!(harness.chat.publishes(BROADCAST), 1, "listing gets published");

    // Unchanged fingerprint: refreshing again makes no external call.
    let writes = harness.chat.writes(BROADCAST);
    broadcaster.refresh().await;
    broadcaster.refresh().await;
    assert_eq!(harness.chat.writes(BROADCAST), writes);
}

#[tokio::test(flavor = "multi_thread")]
async fn edit_budget_caps_writes_and_retry_applies_the_overflow() {
    let harness = Harness::new();
    let guild = harness.guild(GUILD, settings()).await;
    let broadcaster = guild.broadcasters().into_iter().next().expect("broadcaster");
    broadcaster.set_retry_delay(std::time::Duration::from_millis(20));

    let thread = ChannelId(201);
    let content = harness.chat.seed_session_surface(CHANNEL, thread);
    let manager = guild
        .create_session(record(thread, CHANNEL, content, t0() + Duration::hours(100), 1))
        .await;
    settle().await;

    // 40 fingerprint-changing triggers inside one hour: the roster of a
    // capacity-1 session flips between full and empty.
    for step in 0u64..40 {
        if step % 2 == 0 {
            manager.join(&member(step)).await;
        } else {
            manager.leave(UserId(step - 1)).await;
        }
        harness.clock.advance(Duration::seconds(90));
        broadcaster.refresh().await;
    }

    let writes = harness.chat.writes(BROADCAST);
    assert!(
        writes <= 30,
        "at most one write per two minutes of window, got {writes}"
    );
    assert!(writes >= 10, "rate limiting should not starve the listing");

    // The last change was rate limited away; the deferred retry applies it
    // once the window drains instead of dropping it.
    harness.clock.advance(Duration::hours(2));
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let draft = harness.chat.newest_draft(BROADCAST).expect("listing");
    let expect_full = manager.is_full();
    let title = &draft.cards[0].title;
    assert_eq!(
        title.contains("**FULL**"),
        expect_full,
        "final listing must reflect the final roster: {title}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn listing_is_reposted_after_three_edits() {
    let harness = Harness::new();
    let guild = harness.guild(GUILD, settings()).await;
    let broadcaster = guild.broadcasters().into_iter().next().expect("broadcaster");
    broadcaster.set_retry_delay(std::time::Duration::from_millis(20));
    harness.clock.advance(Duration::hours(1));

    let thread = ChannelId(202);
    let content = harness.chat.seed_session_surface(CHANNEL, thread);
    let manager = guild
        .create_session(record(thread, CHANNEL, content, t0() + Duration::hours(100), 1))
        .await;
    settle().await;
    assert_eq!(harness.chat.publishes(BROADCAST), 1);

    // Four more changes: three in-place edits, then delete + resend.
    for step in 100u64..104 {
        if step % 2 == 0 {
            manager.join(&member(step)).await;
        } else {
            manager.leave(UserId(step - 1)).await;
        }
        harness.clock.advance(Duration::minutes(5));
        broadcaster.refresh().await;
    }

    assert_eq!(harness.chat.deletes(BROADCAST), 1, "stale listing deleted");
    assert_eq!(
        harness.chat.publishes(BROADCAST),
        2,
        "reposted listing gets published again"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_listing_message_is_rediscovered() {
    let harness = Harness::new();
    let guild = harness.guild(GUILD, settings()).await;
    let broadcaster = guild.broadcasters().into_iter().next().expect("broadcaster");
    broadcaster.set_retry_delay(std::time::Duration::from_millis(20));
    harness.clock.advance(Duration::hours(1));

    let thread = ChannelId(203);
    let content = harness.chat.seed_session_surface(CHANNEL, thread);
    let manager = guild
        .create_session(record(thread, CHANNEL, content, t0() + Duration::hours(100), 1))
        .await;
    settle().await;
    let first = harness.chat.newest_draft(BROADCAST).expect("listing");
    assert_eq!(first.cards.len(), 1);

    // Somebody deletes the listing out from under us.
    let listing = harness
        .chat
        .recent_messages(BROADCAST, 4)
        .await
        .expect("history")
        .into_iter()
        .next()
        .expect("listing message");
    harness
        .chat
        .delete_message(BROADCAST, listing.id)
        .await
        .expect("delete");

    // Next change: the stale handle fails, is dropped, and the cycle after
    // that posts a fresh listing.
    manager.join(&member(120)).await;
    harness.clock.advance(Duration::minutes(5));
    broadcaster.refresh().await;
    harness.clock.advance(Duration::minutes(5));
    broadcaster.refresh().await;
    settle().await;

    let draft = harness.chat.newest_draft(BROADCAST).expect("fresh listing");
    assert!(draft.cards[0].title.contains("**FULL**"));
}
