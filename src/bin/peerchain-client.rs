#![forbid(unsafe_code)]
//! Command-line client for PeerChain nodes

use clap::{Parser, Subcommand};
use peerchain::blockchain::chain_fingerprint;
use peerchain::error::ChainError;
use peerchain::network::{ChainResponse, NewTransactionRequest, RegisterRequest};
use peerchain::peers::PeerAddress;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "peerchain-client", about = "Talk to PeerChain nodes over HTTP")]
struct Cli {
    /// Node to talk to, in host:port format
    #[arg(short, long, default_value = "127.0.0.1:5000")]
    node: PeerAddress,
    /// Request timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    timeout_ms: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mine a block on the node
    Mine,
    /// Submit a transaction
    Tx {
        sender: String,
        recipient: String,
        amount: f64,
    },
    /// Print the node's chain
    Chain,
    /// List the node's peers
    Nodes,
    /// Register peers with the node
    Register {
        #[arg(required = true)]
        peers: Vec<String>,
    },
    /// Run consensus on the node
    Resolve,
    /// Fetch chains from several nodes and group them by fingerprint
    Compare {
        #[arg(required = true)]
        nodes: Vec<PeerAddress>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), ChainError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(cli.timeout_ms))
        .build()?;
    let base = cli.node.base_url();

    let body: Value = match cli.command {
        Command::Mine => get(&client, &format!("{}/mine", base)).await?,
        Command::Tx {
            sender,
            recipient,
            amount,
        } => {
            let req = NewTransactionRequest {
                sender,
                recipient,
                amount,
            };
            post(&client, &format!("{}/transactions/new", base), &req).await?
        }
        Command::Chain => get(&client, &format!("{}/chain", base)).await?,
        Command::Nodes => get(&client, &format!("{}/nodes/list", base)).await?,
        Command::Register { peers } => {
            let req = RegisterRequest { nodes: peers };
            post(&client, &format!("{}/nodes/register", base), &req).await?
        }
        Command::Resolve => get(&client, &format!("{}/nodes/resolve", base)).await?,
        Command::Compare { nodes } => return compare(&client, &nodes).await,
    };

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn get(client: &reqwest::Client, url: &str) -> Result<Value, ChainError> {
    let response = client.get(url).send().await?;
    Ok(response.json::<Value>().await?)
}

async fn post<B: serde::Serialize>(client: &reqwest::Client, url: &str, body: &B) -> Result<Value, ChainError> {
    let response = client.post(url).json(body).send().await?;
    Ok(response.json::<Value>().await?)
}

async fn compare(client: &reqwest::Client, nodes: &[PeerAddress]) -> Result<(), ChainError> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for node in nodes {
        let url = format!("{}/chain", node.base_url());
        match client.get(&url).send().await {
            Ok(response) => match response.json::<ChainResponse>().await {
                Ok(chain) => {
                    let fingerprint = chain_fingerprint(&chain.chain);
                    println!("  {}: length {} fingerprint {}", node, chain.length, fingerprint);
                    groups.entry(fingerprint).or_default().push(node.to_string());
                }
                Err(e) => println!("  {}: malformed response ({})", node, e),
            },
            Err(e) => println!("  {}: unreachable ({})", node, e),
        }
    }

    match Agreement::of(&groups) {
        Agreement::NoneReachable => {
            return Err(ChainError::NetworkError(format!(
                "none of the {} nodes returned a chain",
                nodes.len()
            )));
        }
        Agreement::Converged => println!("\n✅ All reachable nodes have identical chains."),
        Agreement::Diverged => {
            println!("\n⚠️  Nodes have differing chains:");
            for (fingerprint, members) in &groups {
                println!("  {} found in nodes: {}", fingerprint, members.join(", "));
            }
        }
    }
    Ok(())
}

/// How the reachable nodes' chains compare.
#[derive(Debug, PartialEq, Eq)]
enum Agreement {
    NoneReachable,
    Converged,
    Diverged,
}

impl Agreement {
    fn of(groups: &BTreeMap<String, Vec<String>>) -> Self {
        match groups.len() {
            0 => Agreement::NoneReachable,
            1 => Agreement::Converged,
            _ => Agreement::Diverged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(entries: Vec<(&str, Vec<&str>)>) -> BTreeMap<String, Vec<String>> {
        entries
            .into_iter()
            .map(|(fp, nodes)| (fp.to_string(), nodes.into_iter().map(ToString::to_string).collect()))
            .collect()
    }

    #[test]
    fn test_no_responses_is_not_agreement() {
        assert_eq!(Agreement::of(&BTreeMap::new()), Agreement::NoneReachable);
    }

    #[test]
    fn test_agreement_by_fingerprint_count() {
        let one = groups(vec![("abc", vec!["127.0.0.1:5000", "127.0.0.1:5001"])]);
        assert_eq!(Agreement::of(&one), Agreement::Converged);

        let two = groups(vec![("abc", vec!["127.0.0.1:5000"]), ("def", vec!["127.0.0.1:5001"])]);
        assert_eq!(Agreement::of(&two), Agreement::Diverged);
    }

    #[tokio::test]
    async fn test_compare_fails_when_every_node_is_down() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        // nothing on the discard port serves a chain
        let nodes = vec![PeerAddress::new("127.0.0.1", 9).unwrap()];
        assert!(compare(&client, &nodes).await.is_err());
    }
}
