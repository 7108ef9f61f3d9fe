use anyhow::{bail, Context, Result};
use std::io::Write;

use docqa_core::models::RetrievalResult;
use docqa_core::Error;

use crate::answer::create_generator;
use crate::config::Config;
use crate::retriever::Retriever;

const PREVIEW_CHARS: usize = 200;

/// How much of the retrieval to print after the answer.
#[derive(Debug, Clone, Copy)]
pub struct ReportOptions {
    pub show_sources: bool,
    pub verbose: bool,
}

/// Answer `question` from the configured corpus and print the result.
pub async fn run_query(
    config: &Config,
    question: &str,
    top_k: Option<usize>,
    rebuild: bool,
    options: ReportOptions,
) -> Result<()> {
    if question.trim().is_empty() {
        bail!("Question is empty.");
    }

    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    if top_k == 0 {
        return Err(Error::config("retrieval.top_k", "must be >= 1").into());
    }

    let retriever = Retriever::from_config(config)?;
    let generator = create_generator(&config.generation)?;

    let index = retriever
        .load_or_build(rebuild)
        .await
        .context("Failed to prepare the document index")?;

    let results = retriever.retrieve(question, &index, top_k).await?;
    tracing::debug!(results = results.len(), "retrieved passages");

    let answer = generator
        .generate(question, &results)
        .await
        .context("Failed to generate an answer")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_report(&mut out, question, &answer, &results, options)?;
    out.flush()?;
    Ok(())
}

/// Render the question, the answer, and (optionally) the ranked sources.
pub fn write_report(
    out: &mut impl Write,
    question: &str,
    answer: &str,
    results: &[RetrievalResult],
    options: ReportOptions,
) -> std::io::Result<()> {
    writeln!(out, "Question: {}", question.trim())?;
    writeln!(out)?;
    writeln!(out, "Answer:")?;
    writeln!(out, "{}", answer.trim())?;

    if !options.show_sources || results.is_empty() {
        return Ok(());
    }

    writeln!(out)?;
    writeln!(out, "Sources:")?;
    for (i, result) in results.iter().enumerate() {
        writeln!(
            out,
            "  [{}] {}  score: {:.4}",
            i + 1,
            result.chunk.document_id,
            result.score
        )?;
        if options.verbose {
            writeln!(out, "      path: {}", result.source_path)?;
            writeln!(
                out,
                "      tokens: {}..{} (chunk {})",
                result.chunk.token_start, result.chunk.token_end, result.chunk.sequence_index
            )?;
            writeln!(out, "      preview: {}", preview(&result.chunk.text))?;
        }
    }
    Ok(())
}

/// First [`PREVIEW_CHARS`] characters on one line.
fn preview(text: &str) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if flat.chars().count() > PREVIEW_CHARS {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store;
    use docqa_core::models::Chunk;
    use std::fs;
    use tempfile::TempDir;

    fn result(doc: &str, text: &str, score: f32) -> RetrievalResult {
        RetrievalResult {
            chunk: Chunk {
                id: "id".to_string(),
                document_id: doc.to_string(),
                text: text.to_string(),
                token_start: 0,
                token_end: 9,
                sequence_index: 0,
            },
            score,
            source_path: format!("./docs/{}", doc),
        }
    }

    fn render(results: &[RetrievalResult], show_sources: bool, verbose: bool) -> String {
        let mut buf = Vec::new();
        write_report(
            &mut buf,
            "How do I authenticate?",
            "Send your API key.",
            results,
            ReportOptions {
                show_sources,
                verbose,
            },
        )
        .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_report_with_sources() {
        let out = render(&[result("auth.md", "To authenticate...", 0.15811)], true, false);
        assert!(out.starts_with("Question: How do I authenticate?\n\nAnswer:\nSend your API key.\n"));
        assert!(out.contains("Sources:\n  [1] auth.md  score: 0.1581\n"));
        assert!(!out.contains("preview:"));
    }

    #[test]
    fn test_report_without_sources() {
        let out = render(&[result("auth.md", "x", 0.5)], false, true);
        assert!(!out.contains("Sources:"));
    }

    #[test]
    fn test_verbose_report() {
        let out = render(&[result("auth.md", "line one\nline two", 0.5)], true, true);
        assert!(out.contains("      tokens: 0..9 (chunk 0)\n"));
        assert!(out.contains("      preview: line one line two\n"));
        assert!(out.contains("      path: ./docs/auth.md\n"));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "é".repeat(250);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }

    fn offline_config(tmp: &TempDir) -> Config {
        let docs = tmp.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("auth.md"), "Send your API key.").unwrap();

        let mut config = Config::default();
        config.documents.dir = docs;
        config.storage.dir = tmp.path().join("storage");
        config.generation.provider = "extractive".to_string();
        config
    }

    #[tokio::test]
    async fn test_zero_top_k_rejected_before_indexing() {
        let tmp = TempDir::new().unwrap();
        let config = offline_config(&tmp);
        let options = ReportOptions {
            show_sources: true,
            verbose: false,
        };

        let err = run_query(&config, "auth", Some(0), true, options)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Config {
                field: "retrieval.top_k",
                ..
            })
        ));
        assert!(!store::index_path(&config.storage.dir).exists());
    }
}
