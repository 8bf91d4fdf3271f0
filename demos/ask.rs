use cfo_copilot::Session;
use dotenv::dotenv;
use std::error::Error;

const DEFAULT_QUESTIONS: [&str; 5] = [
    "What was June 2025 revenue vs budget?",
    "Show Gross Margin % trend for the last 3 months.",
    "Break down Opex by category for June 2025.",
    "What was EBITDA last quarter?",
    "What is our cash runway right now?",
];

fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    let mut session = Session::from_env()?;
    println!("Data directory: {}", session.config().data_dir.display());
    let store = session.ensure_loaded(false)?;
    for issue in store.issues() {
        println!("  [{}] {}", issue.table, issue.message);
    }
    for warning in store.warnings() {
        println!("  dropped: {}", warning);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let questions: Vec<String> = if args.is_empty() {
        DEFAULT_QUESTIONS.iter().map(|q| q.to_string()).collect()
    } else {
        vec![args.join(" ")]
    };

    for question in &questions {
        println!("\n> {}", question);
        let response = session.respond(question);
        println!("{}", response.text);
        if let Some(result) = &response.result {
            println!("{}", result.to_json()?);
        }
    }

    if args.is_empty() {
        let pack = session.export_pack()?;
        println!("\nExport pack: {:?}", pack.kinds());
    }

    Ok(())
}
