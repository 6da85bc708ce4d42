use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, instrument, warn};

use crate::domain::{
    FavoriteEntry, FavoriteSyncState,
    favorite::{LocalFavorite, TogglePending},
    value_objects::{Isbn13, UserId},
};
use crate::ports::{RemoteStateStore, StoreError};

use super::errors::{FavoriteError, Result};

type FavoriteKey = (UserId, Isbn13);

type OwnerLocks = Mutex<HashMap<FavoriteKey, Arc<tokio::sync::Mutex<()>>>>;

/// キーごとの非同期ロックへの参照
///
/// 破棄時に他の待機者がいなければ登録簿から取り除く。
struct OwnerSlot<'a> {
    owners: &'a OwnerLocks,
    key: FavoriteKey,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for OwnerSlot<'_> {
    fn drop(&mut self) {
        let mut owners = lock(self.owners);
        // 登録簿と自分の2つだけなら待機者はいない
        let unused = Arc::strong_count(&self.lock) == 2
            && owners
                .get(&self.key)
                .is_some_and(|registered| Arc::ptr_eq(registered, &self.lock));
        if unused {
            owners.remove(&self.key);
        }
    }
}

/// お気に入りトグルコントローラ
///
/// ローカル状態を楽観的に反転し、リモートへバージョン付きで書き込む。
/// 失敗時は巻き戻し、バージョン競合時はリモートの正本へ再同期する。
///
/// 同じキーの操作はキーごとの非同期ロックで直列化され、受け付けた順に完了する。
pub struct FavoriteToggleController {
    store: Arc<dyn RemoteStateStore>,
    local: Mutex<HashMap<FavoriteKey, LocalFavorite>>,
    owners: OwnerLocks,
}

impl FavoriteToggleController {
    pub fn new(store: Arc<dyn RemoteStateStore>) -> Self {
        Self {
            store,
            local: Mutex::new(HashMap::new()),
            owners: Mutex::new(HashMap::new()),
        }
    }

    /// 現在のローカル状態（楽観的更新中の値を含む）
    ///
    /// 一度も読み込んでいないキーは false。
    pub fn is_favorite(&self, user_id: &UserId, isbn13: &Isbn13) -> bool {
        self.local_state(user_id, isbn13)
            .is_some_and(|local| local.is_favorite)
    }

    pub fn local_state(&self, user_id: &UserId, isbn13: &Isbn13) -> Option<LocalFavorite> {
        let key = (user_id.clone(), isbn13.clone());
        lock(&self.local).get(&key).copied()
    }

    /// 既知のエントリでローカル状態を初期化する
    ///
    /// 一覧画面から受け取った初期状態など。楽観的更新中のキーは上書きしない。
    pub fn hydrate(&self, entry: &FavoriteEntry) {
        let key = (entry.user_id.clone(), entry.isbn13.clone());
        let mut local = lock(&self.local);
        let in_flight = local
            .get(&key)
            .is_some_and(|l| matches!(l.state, FavoriteSyncState::OptimisticPending { .. }));
        if !in_flight {
            local.insert(key, LocalFavorite::synced(entry));
        }
    }

    /// リモートの正本を読み直してローカル状態を同期する
    #[instrument(skip(self))]
    pub async fn refresh(&self, user_id: &UserId, isbn13: &Isbn13) -> Result<bool> {
        let owner = self.owner(user_id, isbn13);
        let _owned = owner.lock.lock().await;

        let entry = self
            .read_remote(user_id, isbn13)
            .await
            .map_err(FavoriteError::Transport)?;
        self.store_local(user_id, isbn13, LocalFavorite::synced(&entry));
        Ok(entry.is_favorite)
    }

    /// お気に入りをトグルし、新しい値を返す
    ///
    /// 1. ローカル値を即座に反転（確定前から`is_favorite`で観測可能）
    /// 2. 最後に確認したバージョンを期待値としてリモートへ書き込む
    /// 3. 成功: 新しいバージョンで同期済みにする
    /// 4. バージョン競合: 正本を読み直して反転を破棄し、`VersionConflict`で正本の値を返す
    /// 5. その他の失敗: 直前の値へ巻き戻して`RemoteWrite`を返す（自動再試行はしない）
    #[instrument(skip(self))]
    pub async fn toggle(&self, user_id: &UserId, isbn13: &Isbn13) -> Result<bool> {
        let owner = self.owner(user_id, isbn13);
        let _owned = owner.lock.lock().await;

        let local = match self.local_state(user_id, isbn13) {
            // 巻き戻し済みの状態は次の操作の開始時に同期済みへ戻す
            Some(local) => local.settle(),
            None => self.resync(user_id, isbn13).await?,
        };

        let (optimistic, new_value) = match local.begin_toggle() {
            Ok(started) => started,
            // 前回のトグルが途中で破棄された。書き込みの成否が分からないため正本を読み直す
            Err(TogglePending) => {
                warn!("Abandoned optimistic update found, resyncing");
                self.resync(user_id, isbn13).await?.flip()
            }
        };
        let expected_version = optimistic.version;
        self.store_local(user_id, isbn13, optimistic);

        match self
            .store
            .set_favorite(user_id, isbn13, new_value, expected_version)
            .await
        {
            Ok(new_version) => {
                self.store_local(user_id, isbn13, optimistic.confirm(new_version));
                info!(is_favorite = new_value, version = %new_version, "Favorite updated");
                Ok(new_value)
            }
            Err(StoreError::VersionConflict { expected, .. }) => {
                warn!(expected = %expected, "Favorite version conflict, resyncing");
                match self.read_remote(user_id, isbn13).await {
                    Ok(entry) => {
                        self.store_local(user_id, isbn13, LocalFavorite::synced(&entry));
                        Err(FavoriteError::VersionConflict {
                            expected,
                            actual: entry.version,
                            is_favorite: entry.is_favorite,
                        })
                    }
                    Err(err) => {
                        self.roll_back(user_id, isbn13, optimistic);
                        Err(FavoriteError::RemoteWrite(err))
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "Favorite write failed, rolling back");
                self.roll_back(user_id, isbn13, optimistic);
                Err(FavoriteError::RemoteWrite(err))
            }
        }
    }

    async fn resync(&self, user_id: &UserId, isbn13: &Isbn13) -> Result<LocalFavorite> {
        let entry = self.read_remote(user_id, isbn13).await.map_err(|err| {
            // 書き込み前の読み込み失敗。ローカル状態は変更していない
            FavoriteError::RemoteWrite(err)
        })?;
        let synced = LocalFavorite::synced(&entry);
        self.store_local(user_id, isbn13, synced);
        Ok(synced)
    }

    async fn read_remote(
        &self,
        user_id: &UserId,
        isbn13: &Isbn13,
    ) -> std::result::Result<FavoriteEntry, StoreError> {
        Ok(self
            .store
            .get_favorite(user_id, isbn13)
            .await?
            .unwrap_or_else(|| FavoriteEntry::absent(user_id.clone(), isbn13.clone())))
    }

    fn roll_back(&self, user_id: &UserId, isbn13: &Isbn13, optimistic: LocalFavorite) {
        self.store_local(user_id, isbn13, optimistic.roll_back());
    }

    fn store_local(&self, user_id: &UserId, isbn13: &Isbn13, state: LocalFavorite) {
        lock(&self.local).insert((user_id.clone(), isbn13.clone()), state);
    }

    fn owner(&self, user_id: &UserId, isbn13: &Isbn13) -> OwnerSlot<'_> {
        let key = (user_id.clone(), isbn13.clone());
        let handle = lock(&self.owners).entry(key.clone()).or_default().clone();
        OwnerSlot {
            owners: &self.owners,
            key,
            lock: handle,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
