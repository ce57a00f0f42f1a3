//! Converts raw producer gift payloads into canonical gift events.
//!
//! Streakable gifts (`giftType == 1`) arrive as one event per combo tick with
//! a cumulative `repeatCount`. The tracker remembers the last count per
//! `(sender, gift)` and emits only the positive delta, so missed or repeated
//! ticks neither over- nor under-count.
use std::{
    collections::HashMap,
    time::{SystemTime, UNIX_EPOCH},
};

use giftkey_protocol::CatalogGift;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

/// Gift type code for streakable gifts.
pub const STREAK_GIFT_TYPE: i64 = 1;

/// A gift payload as the live source sends it. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawGift {
    /// Vendor gift id; number or string.
    pub gift_id: Option<Value>,
    /// Display name, any case.
    pub gift_name: String,
    /// Sender handle.
    pub unique_id: Option<String>,
    /// Sender display name.
    pub nickname: Option<String>,
    /// `1` for streakable gifts.
    pub gift_type: i64,
    /// Cumulative streak count.
    pub repeat_count: Option<i64>,
    /// Last tick of a streak.
    pub repeat_end: bool,
    /// Coin value.
    pub diamond_count: u64,
    /// Gift image.
    pub gift_picture_url: Option<String>,
    /// Alternate image field.
    pub gift_image_url: Option<String>,
}

impl RawGift {
    /// Sender name, falling back to `Unknown`.
    pub fn sender(&self) -> String {
        self.unique_id
            .as_deref()
            .or(self.nickname.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or("Unknown")
            .to_string()
    }

    /// First available image URL.
    pub fn image_url(&self) -> Option<String> {
        self.gift_picture_url
            .clone()
            .or_else(|| self.gift_image_url.clone())
    }
}

/// A like payload as the live source sends it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawLike {
    /// Likes in this event.
    pub like_count: Option<u64>,
    /// Sender handle.
    pub unique_id: Option<String>,
}

impl RawLike {
    /// Likes in this event, defaulting to one.
    pub fn count(&self) -> u64 {
        self.like_count.unwrap_or(1)
    }
}

/// A normalized gift, ready for broadcast and dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GiftEvent {
    /// Lowercased gift name; the mapping key.
    pub gift_name: String,
    /// Sender handle.
    pub sender: String,
    /// Number of gifts this event represents.
    pub count_inc: u32,
    /// Coin value.
    pub diamond_count: u64,
    /// Gift image.
    pub image_url: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub ts: u64,
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Per-(sender, gift) streak counts.
#[derive(Debug, Default)]
pub struct StreakTracker {
    /// Last seen cumulative count, present only while a streak is running.
    last: HashMap<String, i64>,
}

impl StreakTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the increment for a streak tick; `None` suppresses the event.
    pub fn observe(
        &mut self,
        sender: &str,
        gift: &str,
        repeat_count: Option<i64>,
        end: bool,
    ) -> Option<u32> {
        let key = format!("{}|{}", sender.to_lowercase(), gift);
        let current = repeat_count.unwrap_or(1).max(1);
        let last = self.last.get(&key).copied().unwrap_or(0);
        let delta = current - last;
        if end {
            self.last.remove(&key);
        } else {
            self.last.insert(key, current);
        }
        if delta <= 0 {
            trace!(sender, gift, current, last, "streak_tick_suppressed");
            return None;
        }
        Some(u32::try_from(delta).unwrap_or(u32::MAX))
    }

    /// Number of streaks in progress.
    pub fn active(&self) -> usize {
        self.last.len()
    }

    /// Forget every streak.
    pub fn clear(&mut self) {
        self.last.clear();
    }
}

/// Gifts discovered live, keyed by lowercased name.
#[derive(Debug, Default)]
pub struct Catalog {
    /// Entries by lowercased name.
    gifts: HashMap<String, CatalogGift>,
}

impl Catalog {
    /// Record a gift the first time its name is seen.
    fn observe(&mut self, key: &str, raw: &RawGift, ts: u64) {
        if raw.gift_name.is_empty() || self.gifts.contains_key(key) {
            return;
        }
        let id = match &raw.gift_id {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => key.to_string(),
        };
        debug!(gift = %raw.gift_name, has_image = raw.image_url().is_some(), "catalog_discovered");
        self.gifts.insert(
            key.to_string(),
            CatalogGift {
                id,
                name: raw.gift_name.clone(),
                image_url: raw.image_url(),
                diamond_count: raw.diamond_count,
                last_seen: ts,
            },
        );
    }

    /// All discovered gifts, sorted by display name.
    pub fn list(&self) -> Vec<CatalogGift> {
        let mut v: Vec<CatalogGift> = self.gifts.values().cloned().collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }
}

/// Streak tracking plus catalog discovery.
#[derive(Debug, Default)]
pub struct Normalizer {
    /// Streak state.
    streaks: StreakTracker,
    /// Live-discovered gifts.
    catalog: Catalog,
}

impl Normalizer {
    /// Create an empty normalizer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize a raw gift. Returns `None` for suppressed or nameless events.
    pub fn normalize(&mut self, raw: &RawGift, ts: u64) -> Option<GiftEvent> {
        let gift_name = raw.gift_name.trim().to_lowercase();
        if gift_name.is_empty() {
            debug!("gift_without_name_ignored");
            return None;
        }
        self.catalog.observe(&gift_name, raw, ts);
        let sender = raw.sender();
        let count_inc = if raw.gift_type == STREAK_GIFT_TYPE {
            self.streaks
                .observe(&sender, &gift_name, raw.repeat_count, raw.repeat_end)?
        } else {
            1
        };
        Some(GiftEvent {
            gift_name,
            sender,
            count_inc,
            diamond_count: raw.diamond_count,
            image_url: raw.image_url(),
            ts,
        })
    }

    /// Discovered gift catalog.
    pub fn catalog(&self) -> Vec<CatalogGift> {
        self.catalog.list()
    }

    /// Forget streak state, e.g. when the producer changes.
    pub fn reset_streaks(&mut self) {
        self.streaks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streak(count: i64, end: bool) -> RawGift {
        RawGift {
            gift_name: "Rose".into(),
            unique_id: Some("alice".into()),
            gift_type: STREAK_GIFT_TYPE,
            repeat_count: Some(count),
            repeat_end: end,
            ..RawGift::default()
        }
    }

    #[test]
    fn streak_deltas_sum_to_final_count() {
        let mut n = Normalizer::new();
        let ticks = [
            streak(1, false),
            streak(3, false),
            streak(3, false),
            streak(7, false),
            streak(7, false),
            streak(7, true),
        ];
        let emitted: Vec<u32> = ticks
            .iter()
            .filter_map(|t| n.normalize(t, 0).map(|e| e.count_inc))
            .collect();
        assert_eq!(emitted, vec![1, 2, 4]);
        assert_eq!(emitted.iter().sum::<u32>(), 7);
        assert_eq!(n.streaks.active(), 0);
    }

    #[test]
    fn end_tick_with_new_count_emits_delta_and_clears() {
        let mut t = StreakTracker::new();
        assert_eq!(t.observe("bob", "rose", Some(2), false), Some(2));
        assert_eq!(t.observe("bob", "rose", Some(5), true), Some(3));
        assert_eq!(t.active(), 0);
        // A fresh streak starts from zero again.
        assert_eq!(t.observe("bob", "rose", Some(1), false), Some(1));
    }

    #[test]
    fn streaks_are_per_sender() {
        let mut t = StreakTracker::new();
        assert_eq!(t.observe("a", "rose", Some(3), false), Some(3));
        assert_eq!(t.observe("B", "rose", Some(3), false), Some(3));
        assert_eq!(t.observe("b", "rose", Some(3), false), None);
    }

    #[test]
    fn non_streak_gifts_always_count_one() {
        let mut n = Normalizer::new();
        let raw = RawGift {
            gift_name: "Lion".into(),
            gift_type: 0,
            repeat_count: Some(9),
            ..RawGift::default()
        };
        for _ in 0..3 {
            let ev = n.normalize(&raw, 10).unwrap();
            assert_eq!(ev.count_inc, 1);
            assert_eq!(ev.gift_name, "lion");
            assert_eq!(ev.sender, "Unknown");
        }
    }

    #[test]
    fn catalog_records_first_sighting() {
        let mut n = Normalizer::new();
        let raw: RawGift = serde_json::from_str(
            r#"{"giftId": 5655, "giftName": "Rose", "diamondCount": 1,
                "giftPictureUrl": "https://img/rose.png", "uniqueId": "x"}"#,
        )
        .unwrap();
        n.normalize(&raw, 100);
        n.normalize(&RawGift { diamond_count: 99, ..raw.clone() }, 200);
        let zebra = RawGift {
            gift_name: "Zebra".into(),
            ..RawGift::default()
        };
        n.normalize(&zebra, 300);
        let cat = n.catalog();
        assert_eq!(cat.len(), 2);
        assert_eq!(cat[0].name, "Rose");
        assert_eq!(cat[0].id, "5655");
        assert_eq!(cat[0].diamond_count, 1);
        assert_eq!(cat[0].last_seen, 100);
        assert_eq!(cat[1].id, "zebra");
    }
}
