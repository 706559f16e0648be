use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::codec::{PlayerData, SpecificIconData, VisualPlayerState};
use crate::util::math::{approx_eq, lerp};
use crate::util::time::{SystemClock, TimeSource};

/// Vertical jump, in game units, above which a discontinuous-flip icon
/// snaps instead of gliding.
pub const FLIP_SNAP_THRESHOLD: f32 = 33.0;

pub const DEFAULT_EXPECTED_DELTA: f32 = 1.0 / 30.0;

pub type PlayerId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolatorSettings {
    /// Apply samples directly instead of smoothing between them
    pub realtime: bool,
    /// Nominal seconds between two server samples, used as the ratio denominator
    pub expected_delta: f32,
}

impl Default for InterpolatorSettings {
    fn default() -> Self {
        Self {
            realtime: false,
            expected_delta: DEFAULT_EXPECTED_DELTA,
        }
    }
}

impl InterpolatorSettings {
    /// Nominal delta matching a server tick rate. Zero keeps the default.
    pub fn for_tps(tps: u32) -> Self {
        let mut settings = Self::default();
        if tps > 0 {
            settings.expected_delta = 1.0 / tps as f32;
        }
        settings
    }
}

/// One timestamped authoritative sample
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LerpFrame {
    pub timestamp: f32,
    pub visual: VisualPlayerState,
}

impl From<&PlayerData> for LerpFrame {
    fn from(data: &PlayerData) -> Self {
        Self {
            timestamp: data.timestamp,
            visual: data.visual(),
        }
    }
}

/// Per-player buffering and bookkeeping
#[derive(Debug, Clone, Default)]
pub struct RemotePlayerState {
    pub older_frame: LerpFrame,
    pub newer_frame: LerpFrame,
    pub interpolated_state: VisualPlayerState,
    /// Local playback clock, rewound to the older frame on every sample
    pub time_counter: f32,
    /// Server packet sequence marker of the last sample
    pub update_counter: f32,
    pub total_frames: u64,
    pub pending_death: bool,
    pub last_death_timestamp: f32,
}

/// Turns sparse per-player samples into a smooth per-frame pose.
///
/// All methods run on the update thread; nothing here is shared.
#[derive(Debug)]
pub struct PlayerInterpolator {
    settings: InterpolatorSettings,
    players: AHashMap<PlayerId, RemotePlayerState>,
    clock: Arc<dyn TimeSource>,
}

impl PlayerInterpolator {
    pub fn new(settings: InterpolatorSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: InterpolatorSettings, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            settings,
            players: AHashMap::new(),
            clock,
        }
    }

    pub fn settings(&self) -> &InterpolatorSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: InterpolatorSettings) {
        self.settings = settings;
    }

    /// Start tracking a player. An already tracked player is reset.
    pub fn add_player(&mut self, id: PlayerId) {
        self.players.insert(id, RemotePlayerState::default());
    }

    pub fn remove_player(&mut self, id: PlayerId) {
        self.players.remove(&id);
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn player_ids(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.players.keys().copied()
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }

    /// Record a new sample. Returns `false` if the player is not tracked.
    pub fn update_player(&mut self, id: PlayerId, data: &PlayerData, update_counter: f32) -> bool {
        let local_ts = self.clock.now_secs();
        let Some(player) = self.players.get_mut(&id) else {
            debug!(player = id, "update for untracked player, ignoring");
            return false;
        };

        player.update_counter = update_counter;
        player.total_frames += 1;

        if !approx_eq(player.last_death_timestamp, data.last_death_timestamp) {
            player.last_death_timestamp = data.last_death_timestamp;
            // the first sample only seeds the marker
            if player.total_frames > 1 {
                player.pending_death = true;
            }
        }

        trace!(
            player = id,
            local_ts,
            ts = data.timestamp,
            x = data.player1.position.x,
            y = data.player1.position.y,
            "real frame"
        );

        if self.settings.realtime {
            player.interpolated_state = data.visual();
            return true;
        }

        player.older_frame = player.newer_frame;
        player.newer_frame = LerpFrame::from(data);
        player.time_counter = player.older_frame.timestamp;
        true
    }

    /// Advance every tracked player by `dt` seconds.
    pub fn tick(&mut self, dt: f32) {
        if self.settings.realtime {
            return;
        }

        let expected_delta = self.settings.expected_delta;
        let local_ts = self.clock.now_secs();

        for (&id, player) in self.players.iter_mut() {
            if player.total_frames < 2 {
                continue;
            }

            let real_delta = player.newer_frame.timestamp - player.older_frame.timestamp;
            if real_delta == 0.0 {
                trace!(player = id, local_ts, time_counter = player.time_counter, "lerp skip");
                continue;
            }

            let ratio = (player.time_counter - player.older_frame.timestamp) / expected_delta;
            lerp_visual(
                &player.older_frame.visual,
                &player.newer_frame.visual,
                &mut player.interpolated_state,
                ratio,
            );

            trace!(
                player = id,
                local_ts,
                time_counter = player.time_counter,
                ratio,
                x = player.interpolated_state.player1.position.x,
                y = player.interpolated_state.player1.position.y,
                "lerp"
            );

            player.time_counter += dt;
        }
    }

    /// Render-ready pose
    pub fn get_player_state(&self, id: PlayerId) -> Option<&VisualPlayerState> {
        self.players.get(&id).map(|p| &p.interpolated_state)
    }

    pub fn player(&self, id: PlayerId) -> Option<&RemotePlayerState> {
        self.players.get(&id)
    }

    /// Take the pending death flag. True at most once per death.
    pub fn swap_death_status(&mut self, id: PlayerId) -> bool {
        self.players
            .get_mut(&id)
            .map(|p| std::mem::take(&mut p.pending_death))
            .unwrap_or(false)
    }

    /// No sample for this player arrived with the latest server packet.
    pub fn is_player_stale(&self, id: PlayerId, last_server_tick: f32) -> bool {
        self.players
            .get(&id)
            .map(|p| p.update_counter != 0.0 && !approx_eq(p.update_counter, last_server_tick))
            .unwrap_or(false)
    }
}

fn lerp_visual(older: &VisualPlayerState, newer: &VisualPlayerState, out: &mut VisualPlayerState, ratio: f32) {
    lerp_icon(&older.player1, &newer.player1, &mut out.player1, ratio);
    lerp_icon(&older.player2, &newer.player2, &mut out.player2, ratio);
}

fn lerp_icon(older: &SpecificIconData, newer: &SpecificIconData, out: &mut SpecificIconData, ratio: f32) {
    out.icon_type = older.icon_type;
    out.is_visible = older.is_visible;
    out.is_looking_left = older.is_looking_left;
    out.is_upside_down = older.is_upside_down;
    out.is_dashing = older.is_dashing;
    out.is_mini = older.is_mini;

    if out.icon_type.flips_discontinuously()
        && (older.position.y - newer.position.y).abs() >= FLIP_SNAP_THRESHOLD
    {
        out.position.x = lerp(older.position.x, newer.position.x, ratio);
        out.position.y = older.position.y;
    } else {
        out.position = older.position.lerp(newer.position, ratio);
    }
    out.rotation = lerp(older.rotation, newer.rotation, ratio);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PlayerIconType;
    use crate::util::time::ManualClock;
    use glam::Vec2;

    const DELTA: f32 = 1.0;

    fn sample(ts: f32, x: f32, y: f32) -> PlayerData {
        PlayerData {
            timestamp: ts,
            player1: SpecificIconData {
                position: Vec2::new(x, y),
                icon_type: PlayerIconType::Cube,
                is_visible: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn interpolator() -> PlayerInterpolator {
        PlayerInterpolator::with_clock(
            InterpolatorSettings {
                realtime: false,
                expected_delta: DELTA,
            },
            Arc::new(ManualClock::new(0.0)),
        )
    }

    fn pos(interp: &PlayerInterpolator, id: PlayerId) -> Vec2 {
        interp.get_player_state(id).unwrap().player1.position
    }

    #[test]
    fn test_lerp_ratio_bounds() {
        let mut interp = interpolator();
        interp.add_player(1);
        interp.update_player(1, &sample(0.0, 0.0, 0.0), 1.0);
        interp.update_player(1, &sample(1.0, 10.0, 0.0), 2.0);

        // ratio 0 lands exactly on the older frame
        interp.tick(0.5);
        assert_eq!(pos(&interp, 1), Vec2::new(0.0, 0.0));

        interp.tick(0.5);
        assert!((pos(&interp, 1).x - 5.0).abs() < 1e-5);

        interp.tick(0.5);
        assert_eq!(pos(&interp, 1), Vec2::new(10.0, 0.0));
    }

    #[test]
    fn test_uses_nominal_delta_not_measured() {
        let mut interp = interpolator();
        interp.add_player(1);
        // samples 4 seconds apart, nominal delta is 1
        interp.update_player(1, &sample(0.0, 0.0, 0.0), 1.0);
        interp.update_player(1, &sample(4.0, 8.0, 0.0), 2.0);

        interp.tick(1.0);
        interp.tick(1.0);
        assert!((pos(&interp, 1).x - 8.0).abs() < 1e-5);
    }

    #[test]
    fn test_single_sample_not_interpolated() {
        let mut interp = interpolator();
        interp.add_player(1);
        interp.update_player(1, &sample(3.0, 7.0, 7.0), 1.0);
        interp.tick(0.1);
        assert_eq!(interp.get_player_state(1), Some(&VisualPlayerState::default()));
    }

    #[test]
    fn test_zero_delta_skips() {
        let mut interp = interpolator();
        interp.add_player(1);
        interp.update_player(1, &sample(0.0, 0.0, 0.0), 1.0);
        interp.update_player(1, &sample(1.0, 10.0, 0.0), 2.0);
        interp.tick(0.5);
        interp.tick(0.5);
        let before = *interp.get_player_state(1).unwrap();

        interp.update_player(1, &sample(1.0, 50.0, 50.0), 3.0);
        let counter = interp.player(1).unwrap().time_counter;
        interp.tick(0.5);

        assert_eq!(interp.get_player_state(1), Some(&before));
        assert_eq!(interp.player(1).unwrap().time_counter, counter);
    }

    #[test]
    fn test_flip_icon_snaps_vertically() {
        let mut interp = interpolator();
        interp.add_player(1);

        let mut floor = sample(0.0, 0.0, 100.0);
        floor.player1.icon_type = PlayerIconType::Spider;
        let mut ceiling = sample(1.0, 10.0, 200.0);
        ceiling.player1.icon_type = PlayerIconType::Spider;

        interp.update_player(1, &floor, 1.0);
        interp.update_player(1, &ceiling, 2.0);
        interp.tick(0.5);
        interp.tick(0.5);

        let p = pos(&interp, 1);
        assert!((p.x - 5.0).abs() < 1e-5);
        assert_eq!(p.y, 100.0);
    }

    #[test]
    fn test_flip_icon_small_move_is_lerped() {
        let mut interp = interpolator();
        interp.add_player(1);

        let mut a = sample(0.0, 0.0, 100.0);
        a.player1.icon_type = PlayerIconType::Spider;
        let mut b = sample(1.0, 0.0, 120.0);
        b.player1.icon_type = PlayerIconType::Spider;

        interp.update_player(1, &a, 1.0);
        interp.update_player(1, &b, 2.0);
        interp.tick(0.5);
        interp.tick(0.5);
        assert!((pos(&interp, 1).y - 110.0).abs() < 1e-4);
    }

    #[test]
    fn test_non_positional_fields_follow_older_frame() {
        let mut interp = interpolator();
        interp.add_player(1);

        let mut a = sample(0.0, 0.0, 0.0);
        a.player1.is_dashing = true;
        a.player1.rotation = 0.0;
        let mut b = sample(1.0, 10.0, 0.0);
        b.player1.is_dashing = false;
        b.player1.is_mini = true;
        b.player1.icon_type = PlayerIconType::Ship;
        b.player1.rotation = 90.0;

        interp.update_player(1, &a, 1.0);
        interp.update_player(1, &b, 2.0);
        interp.tick(0.5);
        interp.tick(0.5);

        let icon = interp.get_player_state(1).unwrap().player1;
        assert!(icon.is_dashing);
        assert!(!icon.is_mini);
        assert_eq!(icon.icon_type, PlayerIconType::Cube);
        assert!((icon.rotation - 45.0).abs() < 1e-4);
    }

    #[test]
    fn test_death_edge_trigger() {
        let mut interp = interpolator();
        interp.add_player(1);

        let mut first = sample(0.0, 0.0, 0.0);
        first.last_death_timestamp = 12.0;
        interp.update_player(1, &first, 1.0);
        assert!(!interp.swap_death_status(1));

        let mut second = sample(1.0, 0.0, 0.0);
        second.last_death_timestamp = 15.0;
        interp.update_player(1, &second, 2.0);
        assert!(interp.swap_death_status(1));
        assert!(!interp.swap_death_status(1));

        // same marker again is not a new death
        let mut third = sample(2.0, 0.0, 0.0);
        third.last_death_timestamp = 15.0;
        interp.update_player(1, &third, 3.0);
        assert!(!interp.swap_death_status(1));
    }

    #[test]
    fn test_staleness() {
        let mut interp = interpolator();
        interp.add_player(1);
        assert!(!interp.is_player_stale(1, 5.0));

        interp.update_player(1, &sample(0.0, 0.0, 0.0), 5.0);
        assert!(!interp.is_player_stale(1, 5.0));
        assert!(interp.is_player_stale(1, 6.0));
    }

    #[test]
    fn test_staleness_at_large_counter() {
        let mut interp = interpolator();
        interp.add_player(1);

        interp.update_player(1, &sample(0.0, 0.0, 0.0), 1_000_000.0);
        assert!(!interp.is_player_stale(1, 1_000_000.0));
        assert!(interp.is_player_stale(1, 1_000_001.0));
    }

    #[test]
    fn test_death_edge_with_large_markers() {
        let mut interp = interpolator();
        interp.add_player(1);

        let mut first = sample(0.0, 0.0, 0.0);
        first.last_death_timestamp = 2_000_000.0;
        interp.update_player(1, &first, 1.0);
        assert!(!interp.swap_death_status(1));

        let mut second = sample(1.0, 0.0, 0.0);
        second.last_death_timestamp = 2_000_001.0;
        interp.update_player(1, &second, 2.0);
        assert!(interp.swap_death_status(1));
    }

    #[test]
    fn test_realtime_applies_samples_directly() {
        let mut interp = PlayerInterpolator::with_clock(
            InterpolatorSettings {
                realtime: true,
                expected_delta: DELTA,
            },
            Arc::new(ManualClock::new(0.0)),
        );
        interp.add_player(1);
        interp.update_player(1, &sample(0.0, 3.0, 4.0), 1.0);
        assert_eq!(pos(&interp, 1), Vec2::new(3.0, 4.0));

        let mut second = sample(1.0, 9.0, 9.0);
        second.last_death_timestamp = 1.0;
        interp.update_player(1, &second, 2.0);
        interp.tick(0.5);
        assert_eq!(pos(&interp, 1), Vec2::new(9.0, 9.0));
        assert!(interp.swap_death_status(1));
    }

    #[test]
    fn test_missing_players() {
        let mut interp = interpolator();
        assert!(!interp.update_player(9, &sample(0.0, 0.0, 0.0), 1.0));
        assert!(interp.get_player_state(9).is_none());
        assert!(!interp.swap_death_status(9));
        assert!(!interp.is_player_stale(9, 1.0));

        interp.remove_player(9);
        interp.add_player(9);
        interp.remove_player(9);
        interp.remove_player(9);
        assert!(interp.is_empty());
    }

    #[test]
    fn test_other_players_keep_ticking() {
        let mut interp = interpolator();
        interp.add_player(1);
        interp.add_player(2);
        interp.update_player(1, &sample(1.0, 0.0, 0.0), 1.0);
        interp.update_player(1, &sample(1.0, 5.0, 0.0), 2.0);
        interp.update_player(2, &sample(0.0, 0.0, 0.0), 1.0);
        interp.update_player(2, &sample(1.0, 10.0, 0.0), 2.0);

        interp.tick(1.0);
        interp.tick(1.0);
        assert_eq!(pos(&interp, 1), Vec2::ZERO);
        assert!((pos(&interp, 2).x - 10.0).abs() < 1e-5);
    }

    #[test]
    fn test_settings_for_tps() {
        assert!((InterpolatorSettings::for_tps(60).expected_delta - 1.0 / 60.0).abs() < 1e-9);
        assert_eq!(InterpolatorSettings::for_tps(0).expected_delta, DEFAULT_EXPECTED_DELTA);
    }
}
