//! Tierwise HTTP capabilities
//!
//! An OpenAI-compatible chat-completions client exposed as a
//! [`tierwise_core::Capability`], usable as an escalation tier, report
//! writer, planner, synthesizer or worker.

pub mod client;
pub mod config;

pub use client::ChatCompletionsCapability;
pub use config::ChatCompletionsConfig;
