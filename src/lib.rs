//! # KB Harness
//!
//! Provision and tear down a retrieval-augmented generation stack on AWS:
//! an OpenSearch Serverless vector collection behind a Bedrock knowledge
//! base, fed from an S3 bucket.
//!
//! Every step is idempotent. Resources are looked up by name before they
//! are created or deleted, so an interrupted run can simply be repeated.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ kbh (CLI)    │──▶│ Orchestrators │──▶│ ResourceApi       │
//! │ config+ctx   │   │ provision     │   │  AwsClient (SigV4)│
//! └──────────────┘   │ deprovision   │   │  InMemoryCloud    │
//!                    └──────┬───────┘   └──────────────────┘
//!                           │
//!                    ensure / poll helpers
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kbh init                      # write ./config/kbh.toml
//! kbh provision                 # policies → collection → index → KB → ingest
//! kbh status                    # what exists right now
//! kbh ask "How do I book leave?"
//! kbh deprovision               # remove everything, children first
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`context`] | Resolved deployment context and request builders |
//! | [`models`] | Resource and request types |
//! | [`traits`] | Cloud API seams (`ResourceApi`, `AccountApi`, `ModelApi`) |
//! | [`aws`] | SigV4-signed HTTP client implementing the traits |
//! | [`memory`] | In-memory cloud for tests and offline runs |
//! | [`ensure`] | Check-then-create / check-then-delete helpers |
//! | [`poll`] | Status polling with interval and timeout |
//! | [`provision`] | Provisioning orchestrator |
//! | [`deprovision`] | Deprovisioning orchestrator |
//! | [`status`] | Read-only resource overview |
//! | [`foundation`] | Foundation model request/response families |
//! | [`ask`] | Retrieve-and-generate and direct model invocation |
//! | [`error`] | Typed API, wait, and orchestration errors |

pub mod ask;
pub mod aws;
pub mod config;
pub mod context;
pub mod deprovision;
pub mod ensure;
pub mod error;
pub mod foundation;
pub mod memory;
pub mod models;
pub mod poll;
pub mod provision;
pub mod status;
pub mod traits;
