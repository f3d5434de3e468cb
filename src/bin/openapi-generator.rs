use std::process::ExitCode;

use flickzy_sync::services::documentation;

fn main() -> ExitCode {
    match documentation::openapi().to_pretty_json() {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("failed to render OpenAPI document: {err}");
            ExitCode::FAILURE
        }
    }
}
