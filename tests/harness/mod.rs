#![allow(dead_code)]

pub mod recording_notifier;
pub mod temp_journal;
