//! Example: dial one endpoint the way the daemon does and print what it reports.
//!
//! Usage:
//! cargo run -p chaind --example probe -- --rpc-url URL --chain-id ID [--token T] [--multicall ADDR]

use chaind::config::{parse_address, MULTICALL3_ADDRESS};
use chaind::{BearerToken, EndpointId, MulticallClient, ReqwestTransport, RpcClient};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args: Vec<String> = std::env::args().collect();
    let mut rpc_url = String::new();
    let mut chain_id = String::new();
    let mut token = None;
    let mut multicall = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--rpc-url" => {
                i += 1;
                rpc_url = args.get(i).cloned().unwrap_or_default();
            }
            "--chain-id" => {
                i += 1;
                chain_id = args.get(i).cloned().unwrap_or_default();
            }
            "--token" => {
                i += 1;
                token = args.get(i).cloned().map(BearerToken::new);
            }
            "--multicall" => {
                i += 1;
                multicall = args.get(i).cloned();
            }
            _ => {}
        }
        i += 1;
    }
    if rpc_url.is_empty() || chain_id.is_empty() {
        eprintln!("Usage: probe --rpc-url URL --chain-id ID [--token TOKEN] [--multicall 0xADDR]");
        std::process::exit(1);
    }
    let id = EndpointId(chain_id.parse()?);
    let contract = match multicall {
        Some(addr) => parse_address(&addr)?,
        None => MULTICALL3_ADDRESS,
    };

    let transport = Arc::new(ReqwestTransport::new()?);
    let rpc = RpcClient::dial(id, &rpc_url, transport.clone(), token.clone())?;
    let batch_rpc = RpcClient::dial(id, &rpc_url, transport, token)?;
    let batch = MulticallClient::new(batch_rpc, contract, 100);

    println!("authenticated={}", rpc.is_authenticated());
    println!("eth_chainId={}", rpc.chain_id().await?);
    let head = rpc.block_number().await?;
    println!("eth_blockNumber={head}");
    println!("block {head} timestamp={}", rpc.block_timestamp(head).await?);
    println!(
        "multicall 0x{} getBlockNumber={}",
        hex::encode(contract),
        batch.block_number().await?
    );
    Ok(())
}
