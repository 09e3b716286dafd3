//! # CRM Insight
//!
//! Retrieval-grounded research answers, triage issues, and CRM message
//! templates for a customer-experience team, served over HTTP.
//!
//! A question goes to a tool-using agent that can search the research
//! corpus (with a freshness gate that pulls in a broader index when the
//! corpus is stale) or the public web. The grounded answer can then be
//! turned into a structured issue record and posted to Slack.
//!
//! ## Architecture
//!
//! ```text
//!  question ──▶ ToolAgent ──▶ pdf_search ──▶ FreshnessGatedRetriever ──▶ primary / secondary index
//!                  │                │                                      ▲
//!                  │                └──▶ GroundedSynthesizer              object store (freshness)
//!                  └──▶ web_search ──▶ WebSearchProvider
//!                  │
//!                  ▼
//!               answer ──▶ IssueStage ──▶ coerce ──▶ IssueRecord ──▶ Notifier
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Pipeline error taxonomy |
//! | [`models`] | Core data types |
//! | [`format`] | Retrieval-hit normalization and context formatting |
//! | [`llm`] | Language-model abstraction and chat-completions client |
//! | [`index`] | Document index abstraction and Azure AI Search client |
//! | [`storage`] | Object store abstraction and S3 client |
//! | [`retriever`] | Freshness-gated retrieval |
//! | [`synthesize`] | Grounded answer synthesis |
//! | [`web_search`] | Web search provider |
//! | [`tools`] | Agent tools and registry |
//! | [`agent`] | Bounded tool-calling agent |
//! | [`coerce`] | Model output → typed record |
//! | [`issue`] | Issue synthesis |
//! | [`templates`] | CRM message templates |
//! | [`notify`] | Slack notifications |
//! | [`upload`] | VOC file uploads |
//! | [`prompts`] | Prompt texts |
//! | [`server`] | HTTP server |

pub mod agent;
pub mod coerce;
pub mod config;
pub mod error;
pub mod format;
pub mod index;
pub mod issue;
pub mod llm;
pub mod models;
pub mod notify;
pub mod prompts;
pub mod retriever;
pub mod server;
pub mod storage;
pub mod synthesize;
pub mod templates;
pub mod tools;
pub mod upload;
pub mod web_search;
