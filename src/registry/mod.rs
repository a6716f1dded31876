//! Talkgroup state: membership, talker arbitration, squelch timing

pub mod talkgroup;

pub use talkgroup::{SqlTimeout, TalkerEvent, TgRegistry};
