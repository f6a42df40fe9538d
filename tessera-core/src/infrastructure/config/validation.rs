use super::types::{AppConfig, SignMode};
use crate::foundation::{Result, SignerError};
use std::collections::HashSet;

/// Reject unsound configurations before any key material is touched.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.state_dir.trim().is_empty() {
        return Err(SignerError::ConfigError("state_dir must be set".to_string()));
    }
    if config.chain_nodes.is_empty() {
        return Err(SignerError::ConfigError("at least one chain node must be configured".to_string()));
    }
    for node in &config.chain_nodes {
        if node.priv_val_addr.trim().is_empty() {
            return Err(SignerError::ConfigError("chain node priv_val_addr must not be empty".to_string()));
        }
    }

    if config.sign_mode == SignMode::Single {
        return Ok(());
    }

    let section = &config.threshold;
    let total = section.cosigners.len();
    if total < 2 {
        return Err(SignerError::ConfigError("threshold mode requires at least two cosigners".to_string()));
    }
    if total > usize::from(u8::MAX) {
        return Err(SignerError::ConfigError("cosigner registry too large".to_string()));
    }
    let threshold = usize::from(section.threshold);
    if threshold < 2 || threshold > total {
        return Err(SignerError::ConfigError(format!("threshold {} is out of range for {} cosigners", threshold, total)));
    }
    // A signable recruit set must always contain a replication quorum, or a
    // signature could exist whose high-water mark was never committed.
    if threshold < section.raft_quorum() {
        return Err(SignerError::ConfigError(format!(
            "threshold {} is below the replication quorum {}; signing must imply a committed high-water mark",
            threshold,
            section.raft_quorum()
        )));
    }

    let mut seen = HashSet::new();
    for cosigner in &section.cosigners {
        if cosigner.shard_id == 0 {
            return Err(SignerError::ConfigError("cosigner shard_id 0 is reserved".to_string()));
        }
        if !seen.insert(cosigner.shard_id) {
            return Err(SignerError::ConfigError(format!("duplicate cosigner shard_id {}", cosigner.shard_id)));
        }
        if cosigner.p2p_addr.trim().is_empty() {
            return Err(SignerError::ConfigError(format!("cosigner {} p2p_addr must not be empty", cosigner.shard_id)));
        }
        cosigner.identity_key()?;
        cosigner.ecies_key()?;
    }

    if section.entry(section.shard_id).is_none() {
        return Err(SignerError::ConfigError(format!(
            "own shard_id {} is not in the cosigner registry",
            section.shard_id
        )));
    }
    if section.listen_addr.trim().is_empty() {
        return Err(SignerError::ConfigError("threshold.listen_addr must be set".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::types::{ChainNode, CosignerEntry, ThresholdSection};

    fn cosigner(shard_id: u8) -> CosignerEntry {
        // RFC 8032 test vector public keys are valid curve points.
        let identities = [
            "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a",
            "3d4017c3e843895a92b70aa74d1b7ebc9c982ccf2ec4968cc0cd55f12af4660c",
            "fc51cd8e6218a1a38da47ed00230f0580816ed13ba3303ac5deb911548908025",
        ];
        CosignerEntry {
            shard_id,
            p2p_addr: format!("127.0.0.1:55{:02}", shard_id),
            identity_pubkey: identities[usize::from(shard_id - 1) % identities.len()].to_string(),
            ecies_pubkey: "8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a".to_string(),
        }
    }

    fn config() -> AppConfig {
        AppConfig {
            sign_mode: SignMode::Threshold,
            state_dir: "/tmp/tessera".to_string(),
            chain_nodes: vec![ChainNode { priv_val_addr: "127.0.0.1:1234".to_string() }],
            threshold: ThresholdSection {
                threshold: 2,
                shard_id: 1,
                listen_addr: "127.0.0.1:5501".to_string(),
                cosigners: vec![cosigner(1), cosigner(2), cosigner(3)],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        validate_config(&config()).expect("valid");
    }

    #[test]
    fn single_mode_skips_threshold_checks() {
        let mut config = config();
        config.sign_mode = SignMode::Single;
        config.threshold.cosigners.clear();
        validate_config(&config).expect("valid");
    }

    #[test]
    fn quorum_rule_is_enforced() {
        // 1-of-3 would allow a signature without a committed mark.
        let mut config1 = config();
        config1.threshold.threshold = 1;
        assert!(validate_config(&config1).is_err());

        // 2-of-5 fails the same rule (quorum is 3).
        let mut config2 = config();
        config2.threshold.cosigners = (1..=5).map(cosigner).collect();
        config2.threshold.threshold = 2;
        assert!(validate_config(&config2).is_err());

        // 3-of-5 is the minimum sound threshold for five shards.
        let mut config3 = config();
        config3.threshold.cosigners = (1..=5).map(cosigner).collect();
        config3.threshold.threshold = 3;
        validate_config(&config3).expect("valid");
    }

    #[test]
    fn duplicate_shard_ids_rejected() {
        let mut config = config();
        config.threshold.cosigners[2].shard_id = 2;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn missing_chain_nodes_rejected() {
        let mut config = config();
        config.chain_nodes.clear();
        assert!(validate_config(&config).is_err());
    }
}
