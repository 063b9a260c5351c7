//! `skills` subcommands

use crate::cli::truncate;
use anyhow::Context;
use clap::Subcommand;
use skillforge_foundation::{AgentConfig, Error};
use skillforge_skill::{apply_similarity_policy, FileSkillIndex, SkillIndex};

#[derive(Subcommand, Debug)]
pub enum SkillsCommand {
    /// List saved skills
    List,
    /// Print a skill document
    Show { name: String },
    /// Find skills similar to a query
    Search {
        query: String,
        /// Maximum number of results
        #[arg(long, default_value = "3")]
        top_k: usize,
    },
    /// Delete a skill
    Remove { name: String },
}

pub async fn handle(config: &AgentConfig, command: SkillsCommand) -> anyhow::Result<()> {
    let dir = config.skills.resolved_dir();
    let index = FileSkillIndex::open(&dir)
        .await
        .with_context(|| format!("cannot open skill library at {}", dir.display()))?;

    match command {
        SkillsCommand::List => {
            let skills = index.list().await?;
            if skills.is_empty() {
                println!("No skills saved yet ({}).", dir.display());
                return Ok(());
            }
            println!("\n📚 Skills in {}\n", dir.display());
            println!("{:<32} {:<10} {}", "Name", "Version", "Description");
            println!("{}", "-".repeat(80));
            for skill in skills {
                println!(
                    "{:<32} {:<10} {}",
                    skill.name,
                    skill.metadata.version,
                    truncate(&skill.description, 36)
                );
            }
            println!();
        }
        SkillsCommand::Show { name } => {
            let skill = index
                .get(&name)
                .await?
                .ok_or_else(|| Error::SkillNotFound(name.clone()))?;
            println!("{}", skill.to_markdown()?);
        }
        SkillsCommand::Search { query, top_k } => {
            let scored = index.query(&query, top_k).await?;
            let hits = apply_similarity_policy(&config.skills.similarity, scored);
            if hits.is_empty() {
                println!("No similar skills.");
            }
            for hit in hits {
                println!(
                    "{:.2}  {:<32} {}",
                    hit.score,
                    hit.skill.name,
                    truncate(&hit.skill.description, 40)
                );
            }
        }
        SkillsCommand::Remove { name } => {
            if index.remove(&name).await? {
                println!("Removed '{}'.", name);
            } else {
                return Err(Error::SkillNotFound(name).into());
            }
        }
    }
    Ok(())
}
