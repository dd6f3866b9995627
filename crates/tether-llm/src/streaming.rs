use anyhow::Result;
use futures::StreamExt;

use crate::traits::FragmentStream;

/// Final answer split into an optional reasoning preamble and the visible text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionedAnswer {
    pub thinking: Option<String>,
    pub answer: String,
}

/// Accumulates streamed fragments for live display and partitions the result.
///
/// The backend gives no explicit marker between reasoning and answer, so the
/// split is textual: a blank line first, then the first fragment boundary.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    fragments: Vec<String>,
    text: String,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return the text accumulated so far
    pub fn push(&mut self, fragment: &str) -> &str {
        if !fragment.is_empty() {
            self.fragments.push(fragment.to_string());
            self.text.push_str(fragment);
        }
        &self.text
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Partition the accumulated text; `None` when there is nothing to show
    pub fn finish(self) -> Option<PartitionedAnswer> {
        partition(&self.text, &self.fragments)
    }
}

pub fn partition(text: &str, fragments: &[String]) -> Option<PartitionedAnswer> {
    if let Some((before, after)) = text.split_once("\n\n") {
        let (thinking, answer) = (before.trim(), after.trim());
        if !thinking.is_empty() && !answer.is_empty() {
            return Some(PartitionedAnswer {
                thinking: Some(thinking.to_string()),
                answer: answer.to_string(),
            });
        }
    }

    if let [first, rest @ ..] = fragments {
        if !rest.is_empty() {
            let rest = rest.concat();
            let (thinking, answer) = (first.trim(), rest.trim());
            if !thinking.is_empty() && !answer.is_empty() {
                return Some(PartitionedAnswer {
                    thinking: Some(thinking.to_string()),
                    answer: answer.to_string(),
                });
            }
        }
    }

    let answer = text.trim();
    (!answer.is_empty()).then(|| PartitionedAnswer {
        thinking: None,
        answer: answer.to_string(),
    })
}

/// Drain `stream`, handing the running text to `on_fragment` after every fragment.
///
/// Returns the aggregator so the caller decides what to do with an empty answer.
/// The first stream error aborts consumption.
pub async fn consume<F>(mut stream: FragmentStream, mut on_fragment: F) -> Result<StreamAggregator>
where
    F: FnMut(&str, &str),
{
    let mut aggregator = StreamAggregator::new();
    while let Some(item) = stream.next().await {
        let fragment = item.inspect_err(|e| {
            tracing::debug!(fragments = aggregator.fragment_count(), error = %e, "LLM: stream aborted");
        })?;
        let running = aggregator.push(&fragment);
        on_fragment(&fragment, running);
    }
    Ok(aggregator)
}
