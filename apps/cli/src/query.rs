//! `query` subcommands and table output.

use std::sync::Arc;

use clap::Subcommand;
use color_eyre::eyre::{Result, eyre};
use paperconcepts_core::QueryEngine;
use paperconcepts_shared::{PaperId, PaperStatus};
use paperconcepts_storage::{ConceptFrequency, Storage};

/// Query subcommands.
#[derive(Subcommand)]
pub(crate) enum QueryCommand {
    /// Most frequently tested concepts.
    Top {
        #[arg(short = 'n', long, default_value = "20")]
        limit: u32,
    },
    /// Concept counts per category, or the concepts of one category.
    Categories {
        /// Show the concepts in this category.
        category: Option<String>,
    },
    /// Concepts tested in a given year.
    Year { year: i32 },
    /// Concepts tested by one paper (id or filename).
    Paper { paper: String },
    /// Concepts related to a concept.
    Related { concept: String },
    /// Keyword search over names, categories and descriptions.
    Search {
        query: String,
        #[arg(short = 'n', long, default_value = "20")]
        limit: u32,
    },
    /// Per-year counts for concepts, or for the most frequent ones.
    Trends {
        /// Concept ids or names. Empty means the top concepts.
        concepts: Vec<String>,
        #[arg(short = 'n', long, default_value = "10")]
        top: u32,
    },
    /// Concepts that appear in the same papers.
    Cooccur {
        concept: String,
        #[arg(short = 'n', long, default_value = "15")]
        limit: u32,
    },
    /// Everything known about one concept.
    Concept { concept: String },
    /// Registered papers.
    Papers {
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        course: Option<String>,
        /// Only papers with this status.
        #[arg(long)]
        status: Option<PaperStatus>,
    },
}

pub(crate) async fn run_query(storage: Arc<Storage>, command: QueryCommand) -> Result<()> {
    let engine = QueryEngine::new(storage);
    let store = engine.storage();

    match command {
        QueryCommand::Top { limit } => {
            frequency_table(&store.concept_frequency(limit).await?).print();
        }
        QueryCommand::Categories { category: None } => {
            let mut table = Table::new(["Category", "Concepts", "Occurrences"]);
            for row in store.category_summary().await? {
                table.row([row.category, row.concepts.to_string(), row.occurrences.to_string()]);
            }
            table.print();
        }
        QueryCommand::Categories {
            category: Some(category),
        } => {
            frequency_table(&store.category_concepts(&category).await?).print();
        }
        QueryCommand::Year { year } => {
            frequency_table(&store.concepts_by_year(year).await?).print();
        }
        QueryCommand::Paper { paper } => {
            let found = match paper.parse::<PaperId>() {
                Ok(id) => store.get_paper(id).await?,
                Err(_) => store.get_paper_by_filename(&paper).await?,
            }
            .ok_or_else(|| eyre!("no paper matching '{paper}'"))?;

            println!("{} ({}, {})", found.filename, found.id, found.status);
            let mut table = Table::new(["Question", "Concept", "Category", "Confidence", "Context"]);
            for m in store.paper_concepts(found.id).await? {
                table.row([
                    m.question.unwrap_or_else(|| "-".into()),
                    m.name,
                    m.category,
                    format!("{:.2}", m.confidence),
                    truncate(&m.context, 60),
                ]);
            }
            table.print();
        }
        QueryCommand::Related { concept } => {
            let concept = engine.resolve_concept(&concept).await?;
            println!("Related to {}", concept.display_name);
            let mut table = Table::new(["Concept", "Relation", "Strength"]);
            for r in store.related_concepts(concept.id).await? {
                let relation = match (r.relation_type.is_undirected(), r.outgoing) {
                    (true, _) => r.relation_type.to_string(),
                    (false, true) => format!("{} (child)", r.relation_type),
                    (false, false) => format!("{} (parent)", r.relation_type),
                };
                table.row([r.name, relation, r.strength.to_string()]);
            }
            table.print();
        }
        QueryCommand::Search { query, limit } => {
            let mut table = Table::new(["Id", "Concept", "Category", "Description"]);
            for hit in store.search_concepts(&query, limit).await? {
                table.row([
                    hit.concept_id.to_string(),
                    hit.name,
                    hit.category,
                    truncate(&hit.description, 60),
                ]);
            }
            table.print();
        }
        QueryCommand::Trends { concepts, top } => {
            let mut ids = Vec::with_capacity(concepts.len());
            for concept in &concepts {
                ids.push(engine.resolve_concept(concept).await?.id);
            }
            for trend in engine.trends(&ids, top).await? {
                let years: Vec<String> = trend
                    .years
                    .iter()
                    .map(|y| format!("{}:{}", y.year, y.occurrences))
                    .collect();
                println!("{:<40} {}", trend.name, years.join("  "));
            }
        }
        QueryCommand::Cooccur { concept, limit } => {
            let concept = engine.resolve_concept(&concept).await?;
            println!("Appears alongside {}", concept.display_name);
            let mut table = Table::new(["Concept", "Shared papers"]);
            for c in store.cooccurring_concepts(concept.id, limit).await? {
                table.row([c.name, c.shared_papers.to_string()]);
            }
            table.print();
        }
        QueryCommand::Concept { concept } => {
            let concept = engine.resolve_concept(&concept).await?;
            let report = engine.concept_report(concept.id).await?;
            let details = &report.details;

            println!("{} ({})", details.concept.display_name, details.concept.id);
            println!("  Category:    {}", details.concept.category);
            if !details.concept.description.is_empty() {
                println!("  Description: {}", details.concept.description);
            }
            println!("  Occurrences: {} in {} papers", details.occurrences, details.papers);
            if let (Some(first), Some(last)) = (details.first_year, details.last_year) {
                println!("  Years:       {first}-{last}");
            }
            if !report.ancestry.is_empty() {
                let chain: Vec<&str> = report.ancestry.iter().map(|c| c.display_name.as_str()).collect();
                println!("  Ancestry:    {}", chain.join(" > "));
            }
            if !report.trend.is_empty() {
                let years: Vec<String> = report
                    .trend
                    .iter()
                    .map(|y| format!("{}:{}", y.year, y.occurrences))
                    .collect();
                println!("  Trend:       {}", years.join("  "));
            }
            if !report.related.is_empty() {
                println!();
                let mut table = Table::new(["Related", "Relation", "Strength"]);
                for r in report.related {
                    table.row([r.name, r.relation_type.to_string(), r.strength.to_string()]);
                }
                table.print();
            }
        }
        QueryCommand::Papers {
            year,
            course,
            status,
        } => {
            let mut table = Table::new(["Id", "Filename", "Year", "Course", "Paper", "Status"]);
            for p in store.list_papers(year, course.as_deref()).await? {
                if status.is_some_and(|s| s != p.status) {
                    continue;
                }
                table.row([
                    p.id.to_string(),
                    p.filename,
                    p.year.map_or_else(|| "-".into(), |y| y.to_string()),
                    p.course.unwrap_or_else(|| "-".into()),
                    p.paper_number.map_or_else(|| "-".into(), |n| n.to_string()),
                    p.status.to_string(),
                ]);
            }
            table.print();
        }
    }
    Ok(())
}

fn frequency_table(rows: &[ConceptFrequency]) -> Table<5> {
    let mut table = Table::new(["Id", "Concept", "Category", "Occurrences", "Papers"]);
    for f in rows {
        table.row([
            f.concept_id.to_string(),
            f.name.clone(),
            f.category.clone(),
            f.occurrences.to_string(),
            f.papers.to_string(),
        ]);
    }
    table
}

fn truncate(s: &str, max: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max {
        return s;
    }
    let cut: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}

/// Column-aligned plain-text table.
struct Table<const N: usize> {
    headers: [&'static str; N],
    rows: Vec<[String; N]>,
}

impl<const N: usize> Table<N> {
    fn new(headers: [&'static str; N]) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    fn row(&mut self, cells: [String; N]) {
        self.rows.push(cells);
    }

    fn print(&self) {
        if self.rows.is_empty() {
            println!("(no results)");
            return;
        }

        let mut widths = self.headers.map(|h| h.chars().count());
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        print_line(self.headers.iter().copied(), &widths);
        let rule: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
        println!("{}", rule.join("  "));
        for row in &self.rows {
            print_line(row.iter().map(String::as_str), &widths);
        }
    }
}

fn print_line<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let padded: Vec<String> = cells
        .zip(widths)
        .map(|(cell, &w)| format!("{cell:<w$}"))
        .collect();
    println!("{}", padded.join("  ").trim_end());
}
