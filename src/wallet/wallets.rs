use crate::config::GLOBAL_CONFIG;
use crate::error::Result;
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use std::collections::HashMap;
use std::env::current_dir;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;

/// Wallet file for one node id. Nodes sharing a working directory keep
/// separate key stores.
pub fn wallet_file_name(node_id: &str) -> String {
    format!("wallet_{node_id}.dat")
}

fn wallet_file_path() -> std::result::Result<PathBuf, Box<dyn std::error::Error>> {
    let node_id = GLOBAL_CONFIG.extract_node_id_from_addr();
    Ok(current_dir()?.join(wallet_file_name(&node_id)))
}

/// On-disk collection of wallets keyed by address.
pub struct Wallets {
    wallets: HashMap<String, Wallet>,
}

impl Default for Wallets {
    fn default() -> Self {
        Self::new()
    }
}

impl Wallets {
    pub fn new() -> Wallets {
        let mut wallets = Wallets {
            wallets: HashMap::new(),
        };
        wallets.load_from_file();
        wallets
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        self.save_to_file();
        Ok(address)
    }

    pub fn get_addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    fn load_from_file(&mut self) {
        // A missing or unreadable wallet file just means an empty collection
        if let Err(e) = self.load_from_file_safe() {
            log::warn!("Could not load wallets from file: {e}");
        }
    }

    fn load_from_file_safe(&mut self) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let path = wallet_file_path()?;
        if !path.exists() {
            return Ok(());
        }

        let mut file = File::open(path)?;
        let metadata = file.metadata()?;
        let mut buf = vec![0; metadata.len() as usize];
        file.read_exact(&mut buf)?;
        let wallets = deserialize(&buf[..])?;
        self.wallets = wallets;
        Ok(())
    }

    fn save_to_file(&self) {
        if let Err(e) = self.save_to_file_safe() {
            log::error!("Could not save wallets to file: {e}");
        }
    }

    fn save_to_file_safe(&self) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let path = wallet_file_path()?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)?;
        let mut writer = BufWriter::new(file);
        let wallets_bytes = serialize(&self.wallets)?;
        writer.write_all(wallets_bytes.as_slice())?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_file_is_namespaced_by_node_id() {
        assert_eq!(wallet_file_name("2001"), "wallet_2001.dat");
        assert_eq!(wallet_file_name("3000"), "wallet_3000.dat");

        let path = wallet_file_path().unwrap();
        let expected = wallet_file_name(&GLOBAL_CONFIG.extract_node_id_from_addr());
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), expected);
    }

    #[test]
    fn test_wallets_persist_to_node_scoped_file() {
        let mut wallets = Wallets::new();
        let address = wallets.create_wallet().unwrap();

        let path = wallet_file_path().unwrap();
        assert!(path.exists());

        let reloaded = Wallets::new();
        assert!(reloaded.get_wallet(&address).is_some());
        assert!(reloaded.get_addresses().contains(&address));
    }
}
