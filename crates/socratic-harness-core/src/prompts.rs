//! Prompt builders for every model call site.
//!
//! Wording is free to change; the JSON shapes requested from the model are
//! what the decoders in the calling modules depend on.

use crate::capability::ChatMessage;
use crate::models::{Chunk, Rubric};
use crate::text::truncate_chars;

/// Learner text sent for theme extraction is capped at this many characters.
pub const THEME_INPUT_CHARS: usize = 2000;

const LEVEL_PREVIEW_CHARS: usize = 100;

/// System instruction for a Socratic evaluator turn.
pub fn evaluator_system(chunks: &[&Chunk], rubrics: &[&Rubric]) -> String {
    let context = chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("Context {}: {}", i + 1, c.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");

    let rubric_lines = rubrics
        .iter()
        .map(|r| {
            let levels = r
                .levels
                .iter()
                .map(|(name, desc)| {
                    format!("{}: {}", capitalize(name), truncate_chars(desc, LEVEL_PREVIEW_CHARS))
                })
                .collect::<Vec<_>>()
                .join("; ");
            format!("{}: {}", r.concept, levels)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a Socratic evaluator. You assess how well the learner understands the \
material through questions. Never teach and never state the answer.\n\n\
Goals: probe the depth of understanding, surface misconceptions, place the learner \
on the rubric levels below, and let the learner articulate their own reasoning.\n\n\
## Material\n{}\n\n## Rubrics\n{}\n\n\
## Guidelines\n\
- Ask one focused, probing question at a time.\n\
- Build on what the learner already said.\n\
- When you notice a misconception, ask about the reasoning behind it.\n\
- Refer to the material only implicitly.\n\
- Keep it to two or three sentences.",
        context, rubric_lines
    )
}

/// Theme extraction over the concatenated learner messages.
pub fn theme_extraction(learner_text: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(format!(
        "Identify the themes and concepts in these learner responses.\n\n\
LEARNER RESPONSES:\n{}\n\n\
Respond with JSON only:\n\
{{\"themes\": [\"3-5 main themes\"], \"key_concepts\": [\"specific concepts mentioned\"], \"confidence\": 0.0}}",
        truncate_chars(learner_text, THEME_INPUT_CHARS)
    ))]
}

/// Context facts shared with the concept evaluation prompt.
pub struct EvaluationContext<'a> {
    pub learner_messages: usize,
    pub trend: &'a str,
}

/// Per-rubric concept evaluation.
pub fn concept_evaluation(
    rubric: &Rubric,
    evidence: &[&str],
    context: &EvaluationContext<'_>,
) -> Vec<ChatMessage> {
    let levels = rubric
        .levels
        .iter()
        .map(|(name, desc)| format!("{}: {}", name.to_uppercase(), desc))
        .collect::<Vec<_>>()
        .join("\n");

    vec![ChatMessage::user(format!(
        "Evaluate the learner's understanding of \"{}\" from their conversation responses.\n\n\
RUBRIC LEVELS:\n{}\n\n\
LEARNER EVIDENCE:\n{}\n\n\
CONVERSATION CONTEXT:\n\
- Learner messages: {}\n\
- Progression trend: {}\n\
- Evidence strength: {} relevant messages\n\n\
Respond with JSON only:\n\
{{\"level\": \"novice|developing|proficient|advanced\", \"score\": 0.75, \
\"evidence\": \"key evidence\", \"feedback\": \"specific feedback\", \"confidence\": 0.8}}",
        rubric.concept,
        levels,
        evidence.join("\n\n"),
        context.learner_messages,
        context.trend,
        evidence.len()
    ))]
}

/// Structured summary over a sample of chunks.
pub fn summary(chunks: &[&Chunk]) -> Vec<ChatMessage> {
    let excerpts = chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("--- Excerpt {} ---\n{}", i + 1, c.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");

    vec![
        ChatMessage::system(
            "You analyze instructional material and write structured summaries for \
instructors preparing assessments. Name the main subject, the key concepts and \
learning objectives, important definitions or principles, assumed prerequisites and \
practical applications. Use ## section headers and bullet points, moving from \
fundamentals to applications.",
        ),
        ChatMessage::user(format!(
            "Summarize the following material excerpts:\n\n{}\n\n\
Capture the essential content, key concepts and learning objectives.",
            excerpts
        )),
    ]
}

/// Key-concept extraction from a summary. Expects a JSON array.
pub fn concept_extraction(summary: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You are an assessment designer. Identify 3-7 distinct key concepts that can be \
assessed through conversation, favoring fundamentals over details.\n\n\
Respond with a JSON array only:\n\
[{\"name\": \"2-5 word concept name\", \"description\": \"what the concept covers\", \
\"assessment_focus\": \"what to assess\"}]",
        ),
        ChatMessage::user(format!(
            "Extract the key concepts from this summary:\n\n{}",
            summary
        )),
    ]
}

/// Four-level rubric for one extracted concept. Expects a JSON object.
pub fn rubric_generation(name: &str, description: &str, focus: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You write assessment rubrics with four proficiency levels. Beginner: initial \
awareness with significant gaps. Developing: partial understanding with some \
misconceptions. Proficient: solid understanding with minor gaps. Mastery: \
comprehensive understanding, able to apply and extend. Describe observable behavior in \
conversation at each level.\n\n\
Respond with a JSON object only:\n\
{\"beginner\": \"...\", \"developing\": \"...\", \"proficient\": \"...\", \"mastery\": \"...\"}",
        ),
        ChatMessage::user(format!(
            "Write a four-level rubric for the concept \"{}\".\n\
Description: {}\nAssessment focus: {}",
            name, description, focus
        )),
    ]
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
