//! A small two-player game used by the integration tests.
//!
//! Each peer owns one fighter. The step function is built per side so that
//! "local" and "remote" map onto the right player on both machines.

#![allow(
    dead_code,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::use_self,
    clippy::derive_partial_eq_without_eq
)]

use rollback_sync::{
    Config, EntityId, Frame, PhaseClock, RollbackState, SyncConfig, Synchronizer,
    SynchronizerBuilder,
};
use serde::{Deserialize, Serialize};

pub const PLAYER_ONE: EntityId = EntityId::new(1);
pub const PLAYER_TWO: EntityId = EntityId::new(2);

const GROUNDED: u32 = 0;
const AIRBORNE: u32 = 1;
const AIRTIME: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    One,
    Two,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StubInput {
    pub buttons: u8,
}

impl StubInput {
    pub const LEFT: u8 = 0b001;
    pub const RIGHT: u8 = 0b010;
    pub const JUMP: u8 = 0b100;

    #[must_use]
    pub const fn new(buttons: u8) -> Self {
        Self { buttons }
    }

    fn pressed(self, button: u8) -> bool {
        self.buttons & button != 0
    }

    /// A varied but reproducible input for `frame`.
    #[must_use]
    pub fn scripted(side: Side, frame: Frame) -> Self {
        let salt = match side {
            Side::One => 3,
            Side::Two => 5,
        };
        let n = frame.as_i32().unsigned_abs();
        Self::new(((n / 7 + salt) % 8) as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fighter {
    pub owner: Side,
    pub x: i32,
    pub height: i32,
    pub jumps: u32,
    pub clock: PhaseClock,
}

impl Fighter {
    #[must_use]
    pub fn spawn(owner: Side) -> Self {
        Self {
            owner,
            x: match owner {
                Side::One => -100,
                Side::Two => 100,
            },
            height: 0,
            jumps: 0,
            clock: PhaseClock::enter(GROUNDED),
        }
    }

    #[must_use]
    pub fn step(&self, input: StubInput) -> Self {
        let mut next = self.clone();
        if input.pressed(StubInput::LEFT) {
            next.x -= 2;
        }
        if input.pressed(StubInput::RIGHT) {
            next.x += 3;
        }
        match self.clock.phase {
            AIRBORNE if self.clock.frames_in_phase + 1 >= AIRTIME => {
                next.height = 0;
                next.clock = PhaseClock::enter(GROUNDED);
            },
            AIRBORNE => {
                let t = self.clock.frames_in_phase as i32 + 1;
                next.height = t * (AIRTIME as i32 - t);
                next.clock = self.clock.tick();
            },
            _ if input.pressed(StubInput::JUMP) => {
                next.jumps += 1;
                next.clock = PhaseClock::enter(AIRBORNE);
            },
            _ => next.clock = self.clock.tick(),
        }
        next
    }
}

impl RollbackState for Fighter {
    fn phase_clock(&self) -> PhaseClock {
        self.clock
    }
}

pub struct StubConfig;

impl Config for StubConfig {
    type Input = StubInput;
    type State = Fighter;
}

/// The step function as seen from `side`'s machine.
pub fn step_for(side: Side) -> impl Fn(&Fighter, &StubInput, &StubInput) -> Fighter + Send + Sync {
    move |fighter, local, remote| {
        let own_input = if fighter.owner == side { local } else { remote };
        fighter.step(*own_input)
    }
}

/// A builder for `side`'s synchronizer with both fighters registered.
pub fn builder_for(side: Side, config: SyncConfig) -> SynchronizerBuilder<StubConfig> {
    SynchronizerBuilder::new()
        .with_config(config)
        .with_entity(PLAYER_ONE, Fighter::spawn(Side::One))
        .with_entity(PLAYER_TWO, Fighter::spawn(Side::Two))
        .with_step_function(step_for(side))
        .with_neutral_input(StubInput::default)
        .with_partial_eq_comparator()
}

#[must_use]
pub fn peer(side: Side) -> Synchronizer<StubConfig> {
    builder_for(side, SyncConfig::default()).build().unwrap()
}
