//! Connection string resolution command.
//!
//! Prints the normalized request for a connection string without
//! provisioning anything. Useful to check which mock key two connection
//! strings map to.

use anyhow::Context as _;
use mockdb::{MOCK_URL_PREFIX, ResolvedRequest, resolver};

use crate::args::ConnectionArgs;

/// Command-line arguments for the `resolve` command.
#[derive(Debug, clap::Args)]
pub struct Args {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

pub fn run(args: Args) -> anyhow::Result<()> {
    let config = args.connection.load_config()?;
    let (url, options) = args.connection.connection(&config)?;

    let request = resolver::resolve(&url, &options)
        .with_context(|| format!("failed to resolve '{url}'"))?
        .with_context(|| format!("'{url}' is not a {MOCK_URL_PREFIX} connection string"))?;

    tracing::debug!(mock_key = %request.mock_key, "resolved connection string");

    print!("{}", describe(&request));
    Ok(())
}

fn describe(request: &ResolvedRequest) -> String {
    let mut lines = vec![
        format!("mock key:       {}", request.mock_key),
        format!("reference host: {}", request.reference_host),
        format!(
            "reference port: {}",
            request
                .reference_port
                .map_or_else(|| "-".to_string(), |port| port.to_string())
        ),
        format!("mock port:      {}", request.mock_port),
        format!("database:       {}", request.database_name),
        format!("user:           {}", request.user.as_deref().unwrap_or("-")),
        format!(
            "password:       {}",
            if request.password.is_some() { "set" } else { "-" }
        ),
    ];
    if let Some(bin) = &request.bin_location {
        lines.push(format!("bin location:   {}", bin.display()));
    }
    if let Some(temp) = &request.temp_folder {
        lines.push(format!("temp folder:    {}", temp.display()));
    }
    for (key, value) in &request.pass_through {
        lines.push(format!("option:         {key}={value}"));
    }

    lines.iter().map(|line| format!("{line}\n")).collect()
}

#[cfg(test)]
mod tests {
    use mockdb::Options;

    use super::*;

    #[test]
    fn describe_lists_request_without_password() {
        //* Given
        let options = Options::from([
            ("mockPort".to_string(), "3307".to_string()),
            ("user".to_string(), "app".to_string()),
            ("password".to_string(), "s3cret".to_string()),
            ("charset".to_string(), "utf8mb4".to_string()),
        ]);
        let request = resolver::resolve("mysql+mock://127.0.0.1:3306/shop", &options)
            .expect("url should resolve")
            .expect("url should be recognized");

        //* When
        let text = describe(&request);

        //* Then
        assert!(text.contains("mock key:       127.0.0.1:3306:shop"), "{text}");
        assert!(text.contains("mock port:      3307"), "{text}");
        assert!(text.contains("option:         charset=utf8mb4"), "{text}");
        assert!(text.contains("password:       set"), "{text}");
        assert!(!text.contains("s3cret"), "{text}");
    }
}
