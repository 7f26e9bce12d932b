//! Participant tracking
//!
//! Owns the live `Player` records of one session, indexed by connection id and
//! by account. Join order is preserved for snapshots and settlement.

use hashbrown::HashMap;

use crate::game::state::{Account, Player, PlayerId};

/// Player manager for one session's participants
#[derive(Debug, Default)]
pub struct PlayerManager {
    players: HashMap<PlayerId, Player>,
    account_index: HashMap<Account, PlayerId>,
    join_order: Vec<PlayerId>,
}

impl PlayerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a participant for a live connection
    pub fn add_player(&mut self, id: PlayerId, account: Account) -> Result<&Player, PlayerError> {
        if self.players.contains_key(&id) {
            return Err(PlayerError::AlreadyRegistered(id));
        }
        if let Some(holder) = self.account_index.get(&account) {
            return Err(PlayerError::AccountInUse {
                account,
                holder: *holder,
            });
        }

        self.account_index.insert(account.clone(), id);
        self.join_order.push(id);
        let player = self.players.entry(id).or_insert_with(|| Player::new(id, account));
        Ok(player)
    }

    pub fn get_player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn get_player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    pub fn get_player_by_account(&self, account: &Account) -> Option<&Player> {
        self.account_index
            .get(account)
            .and_then(|id| self.players.get(id))
    }

    pub fn remove_player(&mut self, id: PlayerId) -> Option<Player> {
        let player = self.players.remove(&id)?;
        self.account_index.remove(&player.account);
        self.join_order.retain(|p| *p != id);
        Some(player)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Player ids in join order
    pub fn ids(&self) -> &[PlayerId] {
        &self.join_order
    }

    /// Players in join order
    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.join_order.iter().filter_map(|id| self.players.get(id))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.values_mut()
    }

    /// At least one player and every player ready
    pub fn all_ready(&self) -> bool {
        !self.players.is_empty() && self.players.values().all(|p| p.ready)
    }

    pub fn ready_count(&self) -> usize {
        self.players.values().filter(|p| p.ready).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlayerError {
    #[error("Connection {0} is already registered")]
    AlreadyRegistered(PlayerId),
    #[error("Account {account} is already held by {holder}")]
    AccountInUse { account: Account, holder: PlayerId },
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn account(s: &str) -> Account {
        Account::parse(s).unwrap()
    }

    #[test]
    fn test_add_and_get() {
        let mut manager = PlayerManager::new();
        let id = Uuid::new_v4();

        let player = manager.add_player(id, account("0xaa")).unwrap();
        assert_eq!(player.id, id);
        assert_eq!(player.health, 100);

        assert!(manager.get_player(id).is_some());
        assert_eq!(manager.get_player_by_account(&account("0xAA")).map(|p| p.id), Some(id));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_duplicate_connection_rejected() {
        let mut manager = PlayerManager::new();
        let id = Uuid::new_v4();
        manager.add_player(id, account("0xaa")).unwrap();

        let result = manager.add_player(id, account("0xbb"));
        assert_eq!(result.unwrap_err(), PlayerError::AlreadyRegistered(id));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_duplicate_account_rejected() {
        let mut manager = PlayerManager::new();
        let first = Uuid::new_v4();
        manager.add_player(first, account("0xaa")).unwrap();

        let result = manager.add_player(Uuid::new_v4(), account("0xaa"));
        assert!(matches!(result, Err(PlayerError::AccountInUse { holder, .. }) if holder == first));
    }

    #[test]
    fn test_remove_frees_account() {
        let mut manager = PlayerManager::new();
        let id = Uuid::new_v4();
        manager.add_player(id, account("0xaa")).unwrap();

        let removed = manager.remove_player(id);
        assert!(removed.is_some());
        assert!(manager.is_empty());
        assert!(manager.get_player_by_account(&account("0xaa")).is_none());
        assert!(manager.remove_player(id).is_none());

        assert!(manager.add_player(Uuid::new_v4(), account("0xaa")).is_ok());
    }

    #[test]
    fn test_join_order_preserved() {
        let mut manager = PlayerManager::new();
        let ids: Vec<_> = (0..4).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            manager.add_player(*id, account(&format!("0x{i}"))).unwrap();
        }
        manager.remove_player(ids[1]);

        assert_eq!(manager.ids(), &[ids[0], ids[2], ids[3]]);
        let order: Vec<_> = manager.iter().map(|p| p.id).collect();
        assert_eq!(order, vec![ids[0], ids[2], ids[3]]);
    }

    #[test]
    fn test_all_ready() {
        let mut manager = PlayerManager::new();
        assert!(!manager.all_ready());

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        manager.add_player(a, account("0xa")).unwrap();
        manager.add_player(b, account("0xb")).unwrap();

        manager.get_player_mut(a).unwrap().ready = true;
        assert!(!manager.all_ready());
        assert_eq!(manager.ready_count(), 1);

        manager.get_player_mut(b).unwrap().ready = true;
        assert!(manager.all_ready());
    }
}
