//! # postvec
//!
//! Semantic indexing for a Markdown blog on Cloudflare.
//!
//! postvec reads posts with YAML front matter, embeds each post body with a
//! Workers AI model, and upserts the vectors together with a small metadata
//! record into a Vectorize index. The same clients answer free-text queries,
//! and a denormalized `{title, slug}` listing is kept in Workers KV for
//! title lookups.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌───────────┐   ┌───────────┐
//! │  Posts   │──▶│ Front matter │──▶│ Assembler │──▶│ Vectorize │
//! │ (*.md)   │   │   parser     │   │ id + meta │   │  upsert   │
//! └──────────┘   └─────────────┘   └─────┬─────┘   └─────┬─────┘
//!                                        │               │
//!                                  ┌─────▼─────┐   ┌─────▼─────┐
//!                                  │Workers AI │◀──│  search   │
//!                                  │ embedding │   │           │
//!                                  └───────────┘   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! postvec index --dry-run           # parse and show what would be indexed
//! postvec index                     # embed and upsert everything under [content].root
//! postvec search "rust lifetimes"   # semantic query
//! postvec listing                   # write the title/slug listing to KV
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credentials |
//! | [`models`] | Core data types |
//! | [`frontmatter`] | Front matter parsing and title fallback |
//! | [`embedding`] | Workers AI embedding client |
//! | [`assemble`] | Document identity and index metadata |
//! | [`vectorize`] | Vectorize upsert and query |
//! | [`search`] | Query pipeline |
//! | [`listing`] | KV title/slug listing |
//! | [`scan`] | Content discovery |
//! | [`ingest`] | Index run orchestration |
//! | [`progress`] | Run progress on stderr |

pub mod assemble;
pub mod config;
pub mod embedding;
pub mod frontmatter;
pub mod http;
pub mod ingest;
pub mod listing;
pub mod models;
pub mod progress;
pub mod scan;
pub mod search;
pub mod vectorize;
