use std::{path::Path, sync::Arc};

use chrono::Local;
use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

pub mod cli;

use cli::{Cli, Command, ConfigAction, HistoryAction};
use divine_dialogue::{
    config_db::{ConfigDb, StoredDialogue},
    context::DialogueContext,
    corpus::{self, CorpusPaths},
    data_dir::DataDir,
    error::{self, Error},
    follow_up::{FollowUpRequest, FollowUpResult, follow_up},
    generation::{self, Generator, OpenAiCompatibleBackend},
    indexer::{self, BuildOptions},
    mcp,
    model_manager::{self, ModelManager},
    orchestrator::{DialogueOutcome, DialogueRequest, DialogueResponse, run_dialogue},
    retriever::RetrievalHit,
    settings::{Overrides, SettingKey, Settings},
    store::{ArtifactPaths, IndexStore},
    text_util::truncate_with_marker,
    transcript::{self, TIMESTAMP_FORMAT},
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DIVINE_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;
    let overrides = Overrides {
        embedding_model: cli.model.clone(),
        ..Overrides::default()
    };
    let settings = Settings::resolve(&overrides, Some(&config_db))?;

    match cli.command {
        Command::Build(args) => {
            cmd_build(&data_dir, &settings, &args, !cli.quiet)?;
        }
        Command::Search(args) => {
            let ctx = open_context(&data_dir, &settings)?;
            cmd_search(&ctx, &args)?;
        }
        Command::Ask(args) => {
            let ctx = open_context(&data_dir, &settings)?;
            cmd_ask(&config_db, &ctx, &args)?;
        }
        Command::FollowUp(args) => {
            let ctx = open_context(&data_dir, &settings)?;
            cmd_follow_up(&config_db, &ctx, &args)?;
        }
        Command::History { action } => match action {
            HistoryAction::List { json } => history_list(&config_db, json)?,
            HistoryAction::Show { id, json } => history_show(&config_db, id, json)?,
            HistoryAction::Export { id, path } => {
                history_export(&config_db, id, &path)?;
            }
            HistoryAction::Clear => {
                let removed = config_db.clear_dialogues()?;
                println!("Removed {removed} dialogue(s)");
            }
        },
        Command::Config { action } => match action {
            ConfigAction::Show { json } => config_show(&settings, json)?,
            ConfigAction::Set { key, value } => {
                config_set(&config_db, key, &value)?;
            }
            ConfigAction::Clear { key } => {
                if config_db.remove_setting(key.key())? {
                    println!("Cleared {key}");
                } else {
                    println!("{key} was not set");
                }
            }
        },
        Command::Status(args) => {
            cmd_status(&config_db, &data_dir, &settings, args.json)?;
        }
        Command::Mcp => {
            let ctx = open_context(&data_dir, &settings)?;
            mcp::run_mcp(ctx)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn embedding_manager(settings: &Settings, fake: bool) -> ModelManager {
    ModelManager::with_model_id(settings.embedding_model.value.clone())
        .with_fake_embeddings(fake || model_manager::fake_embeddings_requested())
}

/// Load the index, the embedder and the LLM client.
fn open_context(
    data_dir: &DataDir,
    settings: &Settings,
) -> error::Result<DialogueContext> {
    let index_dir = data_dir.index_dir();
    if !ArtifactPaths::in_dir(&index_dir).all_exist() {
        return Err(Error::Config(format!(
            "no index in {}; run `divine-dialogue build` first",
            index_dir.display()
        )));
    }

    let embedder = embedding_manager(settings, false).load()?;
    let backend = OpenAiCompatibleBackend::new(settings.backend_config())?;
    if backend.config().api_key.is_none() {
        tracing::warn!(
            "{} is not set; generation requests will fail",
            generation::API_KEY_ENV_VAR
        );
    }

    DialogueContext::open(
        &index_dir,
        embedder,
        Generator::new(Arc::new(backend)),
    )
}

fn cmd_build(
    data_dir: &DataDir,
    settings: &Settings,
    args: &cli::BuildArgs,
    show_progress: bool,
) -> error::Result<()> {
    let corpus_dir = args
        .corpus_dir
        .clone()
        .unwrap_or_else(|| data_dir.corpus_dir());
    let mut paths = CorpusPaths::in_dir(&corpus_dir);
    if let Some(gita) = &args.gita {
        paths.gita = gita.clone();
    }
    if let Some(dhammapada) = &args.dhammapada {
        paths.dhammapada = dhammapada.clone();
    }
    if let Some(bible) = &args.bible {
        paths.bible = bible.clone();
    }

    let corpus = corpus::load_corpus(&paths)?;
    if let Some(path) = &args.dump_records {
        corpus::write_preprocessed(&corpus.records, path)?;
        eprintln!(
            "Wrote {} records to {}",
            corpus.records.len(),
            path.display()
        );
    }

    let manager = embedding_manager(settings, args.fake_embeddings);
    let embedder = manager.load()?;
    eprintln!(
        "Embedding {} verses with {}...",
        corpus.records.len(),
        manager.model_id()
    );

    let options = BuildOptions {
        batch_size: args.batch_size,
        show_progress,
    };
    let report = indexer::build_and_save(
        &corpus.records,
        embedder.as_ref(),
        &data_dir.index_dir(),
        &options,
    )?;

    let stats = corpus.stats;
    println!("Verses loaded:");
    println!("  Krishna (Bhagavad Gita): {}", stats.krishna);
    println!("  Buddha (Dhammapada): {}", stats.buddha);
    println!("  Jesus (Gospels): {}", stats.jesus);
    if stats.skipped > 0 {
        println!("  Skipped malformed: {}", stats.skipped);
    }
    println!(
        "Index: {} vectors, dimension {}, model {}",
        report.vectors, report.dimension, report.model_id
    );
    println!("Written to {}", data_dir.index_dir().display());

    println!("\nSmoke queries:");
    for smoke in &report.smoke {
        match (&smoke.top_reference, smoke.similarity) {
            (Some(reference), Some(similarity)) => println!(
                "  {} \"{}\" -> {} ({:.1}%)",
                smoke.mentor,
                smoke.query,
                reference,
                similarity * 100.0
            ),
            _ => println!("  {} \"{}\" -> no match", smoke.mentor, smoke.query),
        }
    }
    Ok(())
}

fn cmd_search(ctx: &DialogueContext, args: &cli::SearchArgs) -> error::Result<()> {
    let retriever = if args.gloss {
        ctx.plain_retriever().with_glosses(ctx.generator())
    } else {
        ctx.plain_retriever()
    };
    let hits = retriever.retrieve(&args.query, args.mentor, args.count)?;

    if args.json {
        let out = json!({
            "query": args.query,
            "mentor": args.mentor,
            "resultCount": hits.len(),
            "results": hits,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No verses from {} found.", args.mentor);
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        print_hit(i + 1, hit);
    }
    Ok(())
}

fn print_hit(rank: usize, hit: &RetrievalHit) {
    println!(
        "{rank:>2}. [{}] {} ({:.1}%)",
        hit.source_name,
        hit.reference,
        hit.similarity * 100.0
    );
    println!("    {}", hit.text);
    if let Some(gloss) = &hit.gloss {
        println!("    -> {gloss}");
    }
}

fn print_dialogue(response: &DialogueResponse) {
    for turn in &response.mentor_responses {
        let persona = turn.mentor.persona();
        println!(
            "{} {}:\n{}\n",
            persona.icon,
            persona.name.to_uppercase(),
            turn.generated_text
        );
        for hit in &turn.hits {
            println!("  • {} ({:.1}%)", hit.reference, hit.similarity * 100.0);
        }
        if !turn.hits.is_empty() {
            println!();
        }
    }
    println!("🌟 SYNTHESIS:\n{}", response.synthesis);
}

fn cmd_ask(
    config_db: &ConfigDb,
    ctx: &DialogueContext,
    args: &cli::AskArgs,
) -> error::Result<()> {
    let mut request = DialogueRequest::new(args.question.clone());
    if let Some(background) = &args.background {
        request = request.with_background(background.clone());
    }

    let response = match run_dialogue(ctx, &request) {
        DialogueOutcome::Completed(response) => response,
        DialogueOutcome::Failed(failure) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&failure)?);
            } else {
                eprintln!("{}", failure.synthesis);
            }
            return Err(Error::Config(format!("dialogue failed: {}", failure.error)));
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_dialogue(&response);
    }

    if let Some(path) = &args.export {
        transcript::export(&response, path)?;
        eprintln!("Transcript written to {}", path.display());
    }

    if !args.no_save {
        let stored = StoredDialogue {
            created_at: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            response,
        };
        let id = config_db.append_dialogue(&stored)?;
        eprintln!("Saved as dialogue #{id}");
    }
    Ok(())
}

fn cmd_follow_up(
    config_db: &ConfigDb,
    ctx: &DialogueContext,
    args: &cli::FollowUpArgs,
) -> error::Result<()> {
    let (id, mut stored) = match args.dialogue {
        Some(id) => {
            let stored = config_db.get_dialogue(id)?.ok_or_else(|| {
                Error::NotFound {
                    kind: "dialogue",
                    name: id.to_string(),
                }
            })?;
            (id, stored)
        }
        None => config_db.latest_dialogue()?.ok_or_else(|| Error::NotFound {
            kind: "dialogue",
            name: "latest".to_string(),
        })?,
    };

    let request = FollowUpRequest {
        question: args.question.clone(),
        mentor: args.mentor,
        history: stored.response.history.clone(),
        user_background: stored.response.user_background.clone(),
        original_question: Some(stored.response.question.clone()),
    };
    let result: FollowUpResult = follow_up(ctx, &request)?;

    stored.response.history.extend(result.history_entries());
    config_db.update_dialogue(id, &stored)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let persona = result.mentor.persona();
        println!(
            "{} {}:\n{}",
            persona.icon,
            persona.name.to_uppercase(),
            result.generated_text
        );
        for hit in &result.hits {
            println!("  • {} ({:.1}%)", hit.reference, hit.similarity * 100.0);
        }
    }
    Ok(())
}

fn stored_dialogue(config_db: &ConfigDb, id: u64) -> error::Result<StoredDialogue> {
    config_db.get_dialogue(id)?.ok_or_else(|| Error::NotFound {
        kind: "dialogue",
        name: id.to_string(),
    })
}

fn history_list(config_db: &ConfigDb, json: bool) -> error::Result<()> {
    let dialogues = config_db.list_dialogues()?;

    if json {
        let entries: Vec<_> = dialogues
            .iter()
            .map(|(id, d)| {
                json!({
                    "id": id,
                    "createdAt": d.created_at,
                    "question": d.response.question,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if dialogues.is_empty() {
        println!("No stored dialogues.");
    } else {
        for (id, d) in &dialogues {
            println!(
                "#{id:<4} {}  {}",
                d.created_at,
                truncate_with_marker(&d.response.question, 60)
            );
        }
    }
    Ok(())
}

fn history_show(config_db: &ConfigDb, id: u64, json: bool) -> error::Result<()> {
    let stored = stored_dialogue(config_db, id)?;

    if json {
        let out = json!({
            "id": id,
            "createdAt": stored.created_at,
            "dialogue": stored.response,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Dialogue #{id} ({})", stored.created_at);
    println!("Q: {}\n", stored.response.question);
    print_dialogue(&stored.response);

    // Turn entries plus the synthesis come first; anything after is a follow-up.
    let initial = stored.response.mentor_responses.len() + 1;
    let follow_ups = stored.response.history.get(initial..).unwrap_or_default();
    if !follow_ups.is_empty() {
        println!("\nFollow-ups:");
        for entry in follow_ups {
            println!("  {entry}");
        }
    }
    Ok(())
}

fn history_export(config_db: &ConfigDb, id: u64, path: &Path) -> error::Result<()> {
    let stored = stored_dialogue(config_db, id)?;
    transcript::export(&stored.response, path)?;
    println!("Wrote dialogue #{id} to {}", path.display());
    Ok(())
}

fn config_show(settings: &Settings, json: bool) -> error::Result<()> {
    let api_key_set = std::env::var(generation::API_KEY_ENV_VAR)
        .is_ok_and(|k| !k.trim().is_empty());

    if json {
        let out = json!({
            "settings": settings,
            "apiKeySet": api_key_set,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for key in SettingKey::ALL {
        let resolved = settings.get(key);
        println!("{key} = {} ({})", resolved.value, resolved.source);
    }
    println!(
        "{}: {}",
        generation::API_KEY_ENV_VAR,
        if api_key_set { "set" } else { "not set" }
    );
    Ok(())
}

fn config_set(config_db: &ConfigDb, key: SettingKey, value: &str) -> error::Result<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Config(format!("{key} cannot be empty")));
    }
    config_db.set_setting(key.key(), value)?;
    println!("Set {key} = {value}");
    if key == SettingKey::EmbeddingModel {
        eprintln!("Rebuild the index for the new embedding model to take effect.");
    }
    Ok(())
}

fn cmd_status(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    settings: &Settings,
    json: bool,
) -> error::Result<()> {
    let index_dir = data_dir.index_dir();
    let index = if ArtifactPaths::in_dir(&index_dir).all_exist() {
        match IndexStore::open(&index_dir) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(error = %e, "index could not be loaded");
                None
            }
        }
    } else {
        None
    };
    let dialogues = config_db.dialogue_count()?;

    if json {
        let out = json!({
            "dataDir": data_dir.root().display().to_string(),
            "index": index.as_ref().map(|s| json!({
                "vectors": s.len(),
                "dimension": s.dimension(),
                "modelId": s.model_id(),
            })),
            "llmModel": settings.llm_model.value,
            "llmBaseUrl": settings.llm_base_url.value,
            "embeddingModel": settings.embedding_model.value,
            "dialogues": dialogues,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        match &index {
            Some(store) => println!(
                "Index: {} vectors, dimension {}, model {}",
                store.len(),
                store.dimension(),
                store.model_id()
            ),
            None => println!("Index: not built"),
        }
        println!("LLM: {} at {}", settings.llm_model.value, settings.llm_base_url.value);
        println!("Embedding model: {}", settings.embedding_model.value);
        println!("Stored dialogues: {dialogues}");
    }
    Ok(())
}
