#![forbid(unsafe_code)]

//! Download-and-mux pipeline for online videos with a SQLite download
//! history.
//!
//! [`service::VideoService`] is the entry point used by both binaries. It
//! drives [`download::Downloader`], which pulls separate video and audio
//! streams through a [`provider::StreamProvider`] and joins them with ffmpeg,
//! and keeps [`catalog::Catalog`] in step with the files on disk.

pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod humanize;
pub mod logging;
pub mod mux;
pub mod naming;
pub mod provider;
pub mod service;
pub mod ytdlp;

#[cfg(test)]
mod test_support;
