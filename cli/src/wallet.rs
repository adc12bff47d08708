use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use tracing::info;

use shroud_config::ShroudConfig;
use shroud_core::{
    AnonymityAccountant, ConfigExt, KeyValueStore, Readiness, RocksStore, WalletStore,
};
use shroud_privacy::{MerkleTree, MetaAddress, StealthKeys, ViewKey, stealth};

pub type Wallet = WalletStore<RocksStore>;

pub fn open(config: &ShroudConfig) -> Result<Wallet> {
    let store = RocksStore::open(&config.database.path)
        .with_context(|| format!("opening wallet database at {}", config.database.path))?;
    Ok(WalletStore::new(store))
}

fn decode_key(label: &str, encoded: &str) -> Result<[u8; 32]> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .with_context(|| format!("{label} is not valid base58"))?;
    bytes
        .try_into()
        .map_err(|_| anyhow!("{label} must decode to 32 bytes"))
}

fn refuse_overwrite<S: KeyValueStore>(wallet: &WalletStore<S>, force: bool) -> Result<()> {
    if !force && wallet.has_stealth_keys()? {
        bail!("stealth keys already exist; pass --force to replace them");
    }
    Ok(())
}

fn unlock<S: KeyValueStore>(wallet: &WalletStore<S>, passphrase: &str) -> Result<StealthKeys> {
    wallet
        .load_stealth_keys(passphrase)?
        .context("no stealth keys; run `shroud keygen` first")
}

/// Generate keys. With `mnemonic`, also print the 24-word backup phrase.
pub fn keygen<S: KeyValueStore>(
    wallet: &WalletStore<S>,
    passphrase: &str,
    force: bool,
    mnemonic: bool,
) -> Result<()> {
    refuse_overwrite(wallet, force)?;
    let (keys, phrase) = if mnemonic {
        let (keys, phrase) = StealthKeys::generate_with_mnemonic()?;
        (keys, Some(phrase))
    } else {
        (StealthKeys::generate(), None)
    };
    wallet.save_stealth_keys(&keys, passphrase)?;
    info!(backup_phrase = phrase.is_some(), "generated stealth keys");

    println!("{}", keys.meta_address());
    if let Some(phrase) = phrase {
        println!();
        println!("Backup phrase (write it down, it is not stored):");
        println!("{phrase}");
    }
    Ok(())
}

/// Rebuild keys from a backup phrase.
pub fn restore<S: KeyValueStore>(
    wallet: &WalletStore<S>,
    passphrase: &str,
    phrase: &str,
    mnemonic_passphrase: &str,
    force: bool,
) -> Result<()> {
    refuse_overwrite(wallet, force)?;
    let keys = StealthKeys::from_mnemonic(phrase, mnemonic_passphrase)?;
    wallet.save_stealth_keys(&keys, passphrase)?;
    info!("restored stealth keys from backup phrase");
    println!("{}", keys.meta_address());
    Ok(())
}

pub fn address<S: KeyValueStore>(wallet: &WalletStore<S>) -> Result<()> {
    let meta = wallet
        .load_meta_address()?
        .context("no stealth keys; run `shroud keygen` first")?;
    println!("{meta}");
    Ok(())
}

/// Print the scan-only key. Anyone holding it sees incoming payments but
/// cannot spend them.
pub fn export_view_key<S: KeyValueStore>(wallet: &WalletStore<S>, passphrase: &str) -> Result<()> {
    let view = unlock(wallet, passphrase)?.view_key();
    info!("exported view key");
    eprintln!("Anyone with this key can see all incoming payments. They cannot spend them.");
    println!("{}", view.encode());
    Ok(())
}

#[derive(Serialize)]
struct PaymentOutput {
    ephemeral_pubkey: String,
    stealth_address: String,
    stealth_commitment: String,
}

pub fn derive(meta: &str) -> Result<()> {
    let meta: MetaAddress = meta.parse()?;
    let payment = stealth::derive(&meta)?.payment;
    let out = PaymentOutput {
        ephemeral_pubkey: bs58::encode(payment.ephemeral_pubkey).into_string(),
        stealth_address: bs58::encode(payment.stealth_address).into_string(),
        stealth_commitment: bs58::encode(payment.stealth_commitment).into_string(),
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

pub fn scan<S: KeyValueStore>(
    wallet: &WalletStore<S>,
    passphrase: &str,
    ephemeral: &str,
    address: &str,
) -> Result<()> {
    let ephemeral = decode_key("ephemeral key", ephemeral)?;
    let address = decode_key("payment address", address)?;
    let keys = unlock(wallet, passphrase)?;

    match keys.scan(&ephemeral, &address) {
        Some(keypair) => println!("match: {}", bs58::encode(keypair.address).into_string()),
        None => println!("no match"),
    }
    Ok(())
}

/// Detect a payment with an exported view key only.
pub fn scan_with_view_key(view_key: &str, ephemeral: &str, address: &str) -> Result<bool> {
    let view: ViewKey = view_key.parse()?;
    let ephemeral = decode_key("ephemeral key", ephemeral)?;
    let address = decode_key("payment address", address)?;

    let found = view.check(&ephemeral, &address);
    println!("{}", if found { "match" } else { "no match" });
    Ok(found)
}

#[derive(Serialize)]
struct NoteOutput {
    commitment: String,
    denomination: u64,
    leaf_index: u32,
    root: String,
    pending_in_batch: usize,
}

pub fn note<S: KeyValueStore>(
    wallet: &WalletStore<S>,
    config: &ShroudConfig,
    denomination: u64,
) -> Result<()> {
    let mut note = config.vault().generate(denomination)?;

    let mut tree = match wallet.load_tree()? {
        Some(snapshot) => MerkleTree::restore(&snapshot)?,
        None => config.new_tree()?,
    };
    let insertion = tree.insert(&note.commitment)?;
    note.mark_inserted(insertion.leaf_index, insertion.path);

    let mut accountant = match wallet.load_pending_batch()? {
        Some(snapshot) => AnonymityAccountant::restore(config.to_accountant_config(), snapshot),
        None => AnonymityAccountant::new(config.to_accountant_config()),
    };
    let pending = accountant.record_deposit(note.commitment, denomination)?;

    let out = NoteOutput {
        commitment: note.commitment.to_hex(),
        denomination,
        leaf_index: insertion.leaf_index,
        root: bs58::encode(insertion.root).into_string(),
        pending_in_batch: pending,
    };

    wallet.save_tree(&tree.snapshot(true))?;
    wallet.add_note(note)?;
    wallet.save_pending_batch(&accountant.snapshot())?;

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[derive(Serialize)]
struct BatchOutput {
    batch_id: u64,
    pending: usize,
    threshold: usize,
    total_amount: u64,
    readiness: &'static str,
    settled_batches: u64,
}

pub fn batch_status<S: KeyValueStore>(wallet: &WalletStore<S>, config: &ShroudConfig) -> Result<()> {
    let accountant = match wallet.load_pending_batch()? {
        Some(snapshot) => AnonymityAccountant::restore(config.to_accountant_config(), snapshot),
        None => AnonymityAccountant::new(config.to_accountant_config()),
    };
    let batch = accountant.current_batch();
    let out = BatchOutput {
        batch_id: batch.batch_id,
        pending: batch.pending_count(),
        threshold: accountant.config().threshold,
        total_amount: batch.total_amount,
        readiness: match accountant.readiness() {
            Readiness::NotReady => "not_ready",
            Readiness::Threshold => "ready",
            Readiness::Timeout => "ready_by_timeout",
        },
        settled_batches: accountant.settled_batches(),
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
