/// Connection settings for the L1 execution client.
#[derive(Clone, Debug)]
pub struct EthereumL1Config {
    /// HTTP or WS JSON-RPC endpoint.
    pub rpc_url: String,
    /// Hex-encoded ECDSA private keys; each registers its address as a
    /// managed sender.
    pub private_keys: Vec<String>,
}
