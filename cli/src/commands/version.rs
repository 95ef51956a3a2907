//! `soci-registry version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("soci-registry version {}", soci_registry::VERSION);
    println!("user agent: {}", soci_registry::CLIENT_USER_AGENT);
    Ok(())
}
