use clap::{Subcommand, ValueEnum};
use serde_json::Value;

use hoodie_store::{BulkOutcome, DocumentBackend, Object, Store};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

/// Object commands, flattened into the top-level command list
#[derive(Subcommand)]
pub enum ObjectCommand {
    /// Add a new object
    Add {
        /// Object as JSON, e.g. '{"title": "buy milk"}'
        json: String,
    },

    /// Show an object by id
    Find {
        /// Object ID
        id: String,
    },

    /// Show an object, creating it from JSON if it does not exist
    FindOrAdd {
        /// Object ID
        id: String,

        /// Object to create as JSON
        json: String,
    },

    /// List all objects
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "json")]
        format: OutputFormat,
    },

    /// Merge JSON properties into an object
    Update {
        /// Object ID
        id: String,

        /// Changed properties as JSON
        json: String,
    },

    /// Update an object, or create it if it does not exist
    UpdateOrAdd {
        /// Object ID
        id: String,

        /// Properties as JSON
        json: String,
    },

    /// Merge JSON properties into every object
    UpdateAll {
        /// Changed properties as JSON
        json: String,
    },

    /// Remove an object
    Remove {
        /// Object ID
        id: String,
    },

    /// Remove every object
    RemoveAll,

    /// Destroy the local database (no per-object results)
    Clear,
}

impl ObjectCommand {
    pub async fn run<B: DocumentBackend>(
        &self,
        store: &mut Store<B>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match self {
            ObjectCommand::Add { json } => {
                let object = store.add(parse_json(json)?).await?;
                print_object(&object)
            }
            ObjectCommand::Find { id } => {
                let object = store.find(id.as_str()).await?;
                print_object(&object)
            }
            ObjectCommand::FindOrAdd { id, json } => {
                let object = store.find_or_add(id, parse_json(json)?).await?;
                print_object(&object)
            }
            ObjectCommand::List { format } => {
                let objects = store.find_all().await?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&objects)?);
                    }
                    OutputFormat::Text => {
                        if objects.is_empty() {
                            println!("No objects found.");
                        }
                        for object in &objects {
                            println!("{}  {}", field(object, "id"), field(object, "_rev"));
                        }
                    }
                }
                Ok(())
            }
            ObjectCommand::Update { id, json } => {
                let object = store.update(id, parse_json(json)?).await?;
                print_object(&object)
            }
            ObjectCommand::UpdateOrAdd { id, json } => {
                let object = store.update_or_add(id, parse_json(json)?).await?;
                print_object(&object)
            }
            ObjectCommand::UpdateAll { json } => {
                let outcome = store.update_all(parse_json(json)?).await?;
                print_outcome(&outcome, "Updated")
            }
            ObjectCommand::Remove { id } => {
                let object = store.remove(id).await?;
                print_object(&object)
            }
            ObjectCommand::RemoveAll => {
                let outcome = store.remove_all().await?;
                print_outcome(&outcome, "Removed")
            }
            ObjectCommand::Clear => {
                store.clear().await?;
                println!("Local database cleared.");
                Ok(())
            }
        }
    }
}

fn parse_json(input: &str) -> Result<Value, String> {
    serde_json::from_str(input).map_err(|e| format!("Invalid JSON: {}", e))
}

fn field<'a>(object: &'a Object, key: &str) -> &'a str {
    object.get(key).and_then(Value::as_str).unwrap_or("-")
}

fn print_object(object: &Object) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(object)?);
    Ok(())
}

fn print_outcome(outcome: &BulkOutcome, verb: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(&outcome.objects)?);
    let written = outcome.objects.len() - outcome.failures.len();
    eprintln!(
        "{} {} object{}",
        verb,
        written,
        if written == 1 { "" } else { "s" }
    );
    for failure in &outcome.failures {
        eprintln!("  failed: {}", failure);
    }
    Ok(())
}
