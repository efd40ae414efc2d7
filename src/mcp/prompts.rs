//! Prompt templates
//!
//! Rendering is pure text generation; nothing here touches the store.

use super::types::{GetPromptResult, Prompt, PromptArgument, PromptMessage, ToolContent};
use crate::config::Config;
use crate::error::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;

const DEFAULT_RECENT_LIMIT: u64 = 10;

fn argument(name: &str, description: &str, required: bool) -> PromptArgument {
    PromptArgument {
        name: name.to_string(),
        description: description.to_string(),
        required,
    }
}

/// The prompt catalog
pub fn list_prompts() -> Vec<Prompt> {
    vec![
        Prompt {
            name: "analyzeCollection".to_string(),
            description: "Analyze a collection's structure, content and data quality".to_string(),
            arguments: vec![argument("collection", "Name of the collection to analyze", true)],
        },
        Prompt {
            name: "findRecentRecords".to_string(),
            description: "Find the most recent documents in a collection by a date field".to_string(),
            arguments: vec![
                argument("collection", "Name of the collection", true),
                argument("dateField", "Field holding the document timestamp", true),
                argument("limit", "Number of documents to return (default: 10)", false),
            ],
        },
        Prompt {
            name: "aggregateSummary".to_string(),
            description: "Summarize a collection grouped by a field".to_string(),
            arguments: vec![
                argument("collection", "Name of the collection", true),
                argument("groupBy", "Field to group documents by", true),
                argument("metric", "Numeric field to total and average per group", false),
            ],
        },
    ]
}

/// Prompt arguments arrive as strings, but numbers and booleans are tolerated
struct PromptArgs<'a> {
    prompt: &'a str,
    values: &'a HashMap<String, Value>,
}

impl PromptArgs<'_> {
    fn optional(&self, name: &str) -> Option<String> {
        match self.values.get(name)? {
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.trim().to_string()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    fn required(&self, name: &str) -> Result<String> {
        self.optional(name).ok_or_else(|| {
            Error::invalid_arguments(self.prompt, format!("missing required argument '{}'", name))
        })
    }
}

/// Render a prompt by name
pub fn get_prompt(config: &Config, name: &str, arguments: &HashMap<String, Value>) -> Result<GetPromptResult> {
    let args = PromptArgs {
        prompt: name,
        values: arguments,
    };

    let (description, text) = match name {
        "analyzeCollection" => {
            let collection = args.required("collection")?;
            let resource = format!(
                "{}://{}/{}",
                config.resources.scheme, config.database_name, collection
            );
            (
                format!("Analyze the '{}' collection", collection),
                format!(
                    "Analyze the '{collection}' collection in the '{database}' database.\n\n\
                     1. Read the resource {resource} to see its statistics, sample documents and inferred schema.\n\
                     2. Use the `count` tool to check how many documents are missing important fields.\n\
                     3. Use the `query` tool to look at a few more documents if the sample is not representative.\n\n\
                     Then summarize the collection's purpose, its field structure and types, \
                     any inconsistencies or data quality issues, and indexes that would help common queries.",
                    database = config.database_name,
                ),
            )
        }
        "findRecentRecords" => {
            let collection = args.required("collection")?;
            let date_field = args.required("dateField")?;
            let limit = match args.optional("limit") {
                Some(raw) => raw.parse::<u64>().ok().filter(|n| *n > 0).ok_or_else(|| {
                    Error::invalid_arguments(name, format!("limit must be a positive integer, got '{}'", raw))
                })?,
                None => DEFAULT_RECENT_LIMIT,
            };
            let sort = json!({ date_field.as_str(): -1 });
            (
                format!("Find the {} most recent records in '{}'", limit, collection),
                format!(
                    "Find the {limit} most recent documents in the '{collection}' collection.\n\n\
                     Use the `query` tool with collection \"{collection}\", sort {sort} and limit {limit}. \
                     Present the results newest first, noting the '{date_field}' value of each, \
                     and point out anything unusual about the timing or contents of these records.",
                ),
            )
        }
        "aggregateSummary" => {
            let collection = args.required("collection")?;
            let group_by = args.required("groupBy")?;
            let metric = args.optional("metric");

            let mut group = json!({ "_id": format!("${}", group_by), "count": { "$sum": 1 } });
            if let (Some(metric), Some(stage)) = (&metric, group.as_object_mut()) {
                stage.insert("total".to_string(), json!({ "$sum": format!("${}", metric) }));
                stage.insert("average".to_string(), json!({ "$avg": format!("${}", metric) }));
            }
            let pipeline = json!([{ "$group": group }, { "$sort": { "count": -1 } }]);

            let measure = match &metric {
                Some(metric) => format!("the document count and the total and average of '{}'", metric),
                None => "the document count".to_string(),
            };
            (
                format!("Summarize '{}' grouped by '{}'", collection, group_by),
                format!(
                    "Summarize the '{collection}' collection grouped by '{group_by}', reporting {measure} for each group.\n\n\
                     Use the `aggregate` tool with collection \"{collection}\" and this pipeline:\n{pipeline}\n\n\
                     Describe the largest and smallest groups and any notable skew in the distribution.",
                ),
            )
        }
        other => return Err(Error::UnknownPrompt(other.to_string())),
    };

    Ok(GetPromptResult {
        description,
        messages: vec![PromptMessage {
            role: "user".to_string(),
            content: ToolContent::text(text),
        }],
    })
}
