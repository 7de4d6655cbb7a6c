//! rollcalld — biometric attendance check-in daemon.
//!
//! Owns the camera and the recognition models for the duration of one
//! check-in visit, verifies the student's live face against their enrollment
//! portrait, validates the classroom token and writes the attendance record.
//! The kiosk shell talks to it over D-Bus (`org.freedesktop.Rollcall1`).

#![allow(async_fn_in_trait)]

pub mod config;
pub mod dbus_interface;
pub mod engine;
pub mod error;
pub mod ports;
pub mod provenance;
pub mod recorder;
pub mod reference;
pub mod session;
pub mod store;
pub mod token;
pub mod types;
