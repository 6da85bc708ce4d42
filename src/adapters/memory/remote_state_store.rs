use crate::domain::{
    FavoriteEntry, RentalRecord,
    value_objects::{IdempotencyKey, Isbn13, RentalId, UserId, Version},
};
use crate::ports::remote_state_store::{
    RemoteStateStore as RemoteStateStoreTrait, Result, StoreError, WriteAck,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[derive(Default)]
struct State {
    rentals: HashMap<RentalId, RentalRecord>,
    applied_keys: HashSet<IdempotencyKey>,
    favorites: HashMap<(UserId, Isbn13), FavoriteEntry>,
}

/// インメモリのRemoteStateStore実装
///
/// ローカル実行とテスト用。障害注入をサポートする：
/// - 読み込み失敗、レンタル書き込み失敗、お気に入り書き込み失敗
/// - 適用後の応答喪失（書き込みは成功したが呼び出し側にはエラーが返る）
/// - 各操作の遅延
pub struct RemoteStateStore {
    state: Mutex<State>,
    failing_reads: AtomicU32,
    failing_rental_writes: AtomicU32,
    rental_writes_before_failure: AtomicU32,
    delayed_rental_failures: AtomicU32,
    lost_rental_acks: AtomicU32,
    failing_favorite_writes: AtomicU32,
    rental_write_attempts: AtomicU32,
    favorite_write_attempts: AtomicU32,
    latency: Mutex<Option<Duration>>,
}

impl RemoteStateStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            failing_reads: AtomicU32::new(0),
            failing_rental_writes: AtomicU32::new(0),
            rental_writes_before_failure: AtomicU32::new(0),
            delayed_rental_failures: AtomicU32::new(0),
            lost_rental_acks: AtomicU32::new(0),
            failing_favorite_writes: AtomicU32::new(0),
            rental_write_attempts: AtomicU32::new(0),
            favorite_write_attempts: AtomicU32::new(0),
            latency: Mutex::new(None),
        }
    }

    /// 各操作の前に待機する時間を設定
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// 次のn回の読み込みを失敗させる
    pub fn fail_next_reads(&self, n: u32) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// 次のn回のレンタル書き込みを失敗させる（適用しない）
    pub fn fail_next_rental_writes(&self, n: u32) {
        self.failing_rental_writes.store(n, Ordering::SeqCst);
    }

    /// 次の`successes`回のレンタル書き込みは通常どおり適用し、その後の`failures`回を失敗させる
    pub fn fail_rental_writes_after(&self, successes: u32, failures: u32) {
        self.rental_writes_before_failure
            .store(successes, Ordering::SeqCst);
        self.delayed_rental_failures.store(failures, Ordering::SeqCst);
    }

    /// 次のn回のレンタル書き込みは適用するが、応答を失わせる
    pub fn lose_next_rental_acks(&self, n: u32) {
        self.lost_rental_acks.store(n, Ordering::SeqCst);
    }

    /// 次のn回のお気に入り書き込みを失敗させる
    pub fn fail_next_favorite_writes(&self, n: u32) {
        self.failing_favorite_writes.store(n, Ordering::SeqCst);
    }

    /// テスト用にレンタル記録を直接登録
    pub fn insert_rental(&self, record: RentalRecord) {
        self.state
            .lock()
            .unwrap()
            .rentals
            .insert(record.id, record);
    }

    /// テスト用にお気に入りエントリを直接登録（他端末からの更新を再現）
    pub fn put_favorite(&self, entry: FavoriteEntry) {
        let key = (entry.user_id.clone(), entry.isbn13.clone());
        self.state.lock().unwrap().favorites.insert(key, entry);
    }

    pub fn rentals(&self) -> Vec<RentalRecord> {
        self.state.lock().unwrap().rentals.values().cloned().collect()
    }

    pub fn rentals_for(&self, user_id: &UserId, isbn13: &Isbn13) -> Vec<RentalRecord> {
        self.rentals()
            .into_iter()
            .filter(|r| &r.user_id == user_id && &r.isbn13 == isbn13)
            .collect()
    }

    pub fn favorite(&self, user_id: &UserId, isbn13: &Isbn13) -> Option<FavoriteEntry> {
        self.state
            .lock()
            .unwrap()
            .favorites
            .get(&(user_id.clone(), isbn13.clone()))
            .cloned()
    }

    pub fn rental_write_attempts(&self) -> u32 {
        self.rental_write_attempts.load(Ordering::SeqCst)
    }

    pub fn favorite_write_attempts(&self) -> u32 {
        self.favorite_write_attempts.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for RemoteStateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// カウンタが正なら1減らしてtrue
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn injected(what: &str) -> StoreError {
    StoreError::transport(format!("injected {} failure", what))
}

#[async_trait]
impl RemoteStateStoreTrait for RemoteStateStore {
    async fn get_active_rental(
        &self,
        user_id: &UserId,
        isbn13: &Isbn13,
    ) -> Result<Option<RentalRecord>> {
        self.simulate_latency().await;
        if take_one(&self.failing_reads) {
            return Err(injected("read"));
        }

        let state = self.state.lock().unwrap();
        Ok(state
            .rentals
            .values()
            .filter(|r| &r.user_id == user_id && &r.isbn13 == isbn13 && r.status.is_open())
            .max_by_key(|r| r.updated_at)
            .cloned())
    }

    async fn write_rental(&self, record: &RentalRecord, key: &IdempotencyKey) -> Result<WriteAck> {
        self.simulate_latency().await;
        self.rental_write_attempts.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failing_rental_writes) {
            return Err(injected("rental write"));
        }
        if self.delayed_rental_failures.load(Ordering::SeqCst) > 0
            && !take_one(&self.rental_writes_before_failure)
            && take_one(&self.delayed_rental_failures)
        {
            return Err(injected("rental write"));
        }

        let ack = {
            let mut state = self.state.lock().unwrap();
            if state.applied_keys.insert(key.clone()) {
                // 終端状態の記録は上書きしない
                let terminal = state
                    .rentals
                    .get(&record.id)
                    .is_some_and(|existing| existing.status.is_terminal());
                if !terminal {
                    state.rentals.insert(record.id, record.clone());
                }
                WriteAck::Applied
            } else {
                WriteAck::Duplicate
            }
        };

        if take_one(&self.lost_rental_acks) {
            return Err(injected("rental ack"));
        }
        Ok(ack)
    }

    async fn get_favorite(
        &self,
        user_id: &UserId,
        isbn13: &Isbn13,
    ) -> Result<Option<FavoriteEntry>> {
        self.simulate_latency().await;
        if take_one(&self.failing_reads) {
            return Err(injected("read"));
        }
        Ok(self.favorite(user_id, isbn13))
    }

    async fn set_favorite(
        &self,
        user_id: &UserId,
        isbn13: &Isbn13,
        value: bool,
        expected_version: Version,
    ) -> Result<Version> {
        self.simulate_latency().await;
        self.favorite_write_attempts.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failing_favorite_writes) {
            return Err(injected("favorite write"));
        }

        let mut state = self.state.lock().unwrap();
        let key = (user_id.clone(), isbn13.clone());
        let current = state
            .favorites
            .get(&key)
            .map(|e| e.version)
            .unwrap_or(Version::INITIAL);

        if current != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: current,
            });
        }

        let new_version = current.next();
        state.favorites.insert(
            key,
            FavoriteEntry {
                user_id: user_id.clone(),
                isbn13: isbn13.clone(),
                is_favorite: value,
                version: new_version,
            },
        );
        Ok(new_version)
    }
}
