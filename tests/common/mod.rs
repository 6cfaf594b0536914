//! Shared fixtures: a scripted ledger, an in-process sponsor and a pipeline
//! wired to both

#![allow(dead_code)]

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use sponsored_tx::ledger::ScriptedLedger;
use sponsored_tx::signer::{KeypairSigner, MockSigner};
use sponsored_tx::sponsor::{FeeSponsorCoordinator, SponsorClient};
use sponsored_tx::{
    ClientSigner, EndpointPool, LedgerEndpoint, NetworkProfile, PipelineConfig, TransferIntent,
    TransferKind, TransferPipeline,
};
use std::sync::Arc;

pub const DECIMALS: u8 = 6;

pub struct World {
    pub ledger: Arc<ScriptedLedger>,
    pub config: PipelineConfig,
    pub profile: NetworkProfile,
    pub coordinator: Arc<FeeSponsorCoordinator>,
    pub sender: Arc<MockSigner>,
    pub recipient: Pubkey,
}

impl World {
    pub fn test_network() -> Self {
        Self::with_network(None)
    }

    pub fn production() -> Self {
        Self::with_network(Some("mainnet"))
    }

    fn with_network(network: Option<&str>) -> Self {
        let sponsor = Keypair::new();
        let mut config = PipelineConfig::new(
            vec!["http://primary.ledger.test".to_string()],
            sponsor.pubkey(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            DECIMALS,
        );
        config.network.name = network.map(str::to_string);
        let profile = config.network_profile().unwrap();

        let ledger = Arc::new(ScriptedLedger::new("mock://ledger"));
        let sponsor_signer: Arc<dyn ClientSigner> = Arc::new(KeypairSigner::new(sponsor));
        let coordinator = Arc::new(
            FeeSponsorCoordinator::from_config(sponsor_signer, pool_over(&ledger, &profile), &config, &profile)
                .unwrap(),
        );

        Self {
            ledger,
            config,
            profile,
            coordinator,
            sender: Arc::new(MockSigner::new()),
            recipient: Pubkey::new_unique(),
        }
    }

    pub fn sponsor_key(&self) -> Pubkey {
        self.config.sponsor.public_key
    }

    /// Pipeline talking to the in-process coordinator
    pub fn pipeline(&self) -> TransferPipeline {
        self.pipeline_with(Arc::clone(&self.coordinator) as Arc<dyn SponsorClient>)
    }

    pub fn pipeline_with(&self, sponsor: Arc<dyn SponsorClient>) -> TransferPipeline {
        TransferPipeline::new(&self.config, pool_over(&self.ledger, &self.profile), sponsor).unwrap()
    }

    pub fn intent(&self, kind: TransferKind, amount: u64) -> TransferIntent {
        TransferIntent::single(kind, self.sender.pubkey(), self.recipient, amount, true).unwrap()
    }
}

pub fn pool_over(ledger: &Arc<ScriptedLedger>, profile: &NetworkProfile) -> Arc<EndpointPool> {
    Arc::new(
        EndpointPool::new(
            vec![Arc::clone(ledger) as Arc<dyn LedgerEndpoint>],
            profile.endpoint_min_dwell,
        )
        .unwrap(),
    )
}
