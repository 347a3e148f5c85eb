//! divine-dialogue - three scripture-grounded mentors answering one question.
//!
//! Verses from the Bhagavad Gita, the Dhammapada and the four Gospels are
//! embedded into one exact vector index. A question is answered in turn by
//! Krishna, Buddha and Jesus, each retrieving only from their own scripture
//! and seeing what the previous mentors said, and a moderator then merges
//! the three answers into a personal synthesis.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use divine_dialogue::{
//!     DataDir, DialogueContext, DialogueOutcome, DialogueRequest, Generator,
//!     ModelManager, OpenAiCompatibleBackend,
//!     generation::BackendConfig,
//!     orchestrator::run_dialogue,
//! };
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let embedder = ModelManager::new().load().unwrap();
//! let backend = OpenAiCompatibleBackend::new(BackendConfig::from_env()).unwrap();
//! let ctx = DialogueContext::open(
//!     &data_dir.index_dir(),
//!     embedder,
//!     Generator::new(Arc::new(backend)),
//! )
//! .unwrap();
//!
//! let request = DialogueRequest::new("How can I find inner peace?");
//! if let DialogueOutcome::Completed(response) = run_dialogue(&ctx, &request) {
//!     for turn in &response.mentor_responses {
//!         println!("{}: {}", turn.mentor, turn.generated_text);
//!     }
//!     println!("{}", response.synthesis);
//! }
//! ```

pub mod config_db;
pub mod context;
pub mod corpus;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod flat_index;
pub mod follow_up;
pub mod generation;
pub mod indexer;
pub mod mcp;
pub mod model_manager;
pub mod orchestrator;
pub mod persona;
pub mod prompts;
pub mod retriever;
pub mod sanitize;
pub mod settings;
pub mod store;
pub mod text_util;
pub mod transcript;

pub use config_db::ConfigDb;
pub use context::DialogueContext;
pub use data_dir::DataDir;
pub use embedding::{Embedder, HashEmbedder};
pub use error::{Error, Result};
pub use generation::{CompletionBackend, Generator, OpenAiCompatibleBackend};
pub use model_manager::ModelManager;
pub use orchestrator::{DialogueOutcome, DialogueRequest, DialogueResponse};
pub use persona::Mentor;
pub use retriever::{RetrievalHit, Retriever};
pub use store::IndexStore;
