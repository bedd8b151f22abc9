//! # Application Port
//!
//! The bridge talks to its application through two channels: inbound
//! `{topic, payload}` messages and outbound `{action, ...}` commands. This module
//! connects those channels to a concrete application.
//!
//! The stdio port speaks line-delimited JSON: one command per line on stdin, one
//! message per line on stdout. Any front-end that can spawn a process and pipe
//! JSON lines can drive the bridge this way. Logging goes to stderr so stdout
//! carries nothing but messages.

pub mod stdio;
