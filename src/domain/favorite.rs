use serde::{Deserialize, Serialize};

use super::{Isbn13, UserId, Version};

/// お気に入りエントリ（リモートの正本）
///
/// 最初のトグルで作成され、以降のトグルごとに更新される。削除はしない
/// （`is_favorite = false`も正当な定常状態）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteEntry {
    pub user_id: UserId,
    pub isbn13: Isbn13,
    pub is_favorite: bool,
    pub version: Version,
}

impl FavoriteEntry {
    /// リモートに存在しないエントリ相当の値
    pub fn absent(user_id: UserId, isbn13: Isbn13) -> Self {
        Self {
            user_id,
            isbn13,
            is_favorite: false,
            version: Version::INITIAL,
        }
    }
}

/// ローカル状態の同期ステータス
///
/// Synced → OptimisticPending → Synced（成功）
/// OptimisticPending → RolledBack → Synced（失敗）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FavoriteSyncState {
    Synced,
    /// 楽観的に反転済み。リモート確定待ち
    OptimisticPending { prior: bool },
    /// 書き込み失敗により直前の値へ巻き戻した
    RolledBack,
}

/// ローカルに保持するお気に入り状態
///
/// `version`は最後に確認できたリモートのバージョン。楽観的更新中も変わらない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFavorite {
    pub is_favorite: bool,
    pub version: Version,
    pub state: FavoriteSyncState,
}

/// 進行中の楽観的更新があるのに新しいトグルが始まった
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TogglePending;

impl LocalFavorite {
    /// リモートのエントリと同期済みの状態
    pub fn synced(entry: &FavoriteEntry) -> Self {
        Self {
            is_favorite: entry.is_favorite,
            version: entry.version,
            state: FavoriteSyncState::Synced,
        }
    }

    /// 楽観的に反転する
    ///
    /// 反転後の状態と、リモートに書き込むべき新しい値を返す。
    pub fn begin_toggle(&self) -> Result<(Self, bool), TogglePending> {
        if let FavoriteSyncState::OptimisticPending { .. } = self.state {
            return Err(TogglePending);
        }
        Ok(self.flip())
    }

    /// 状態を問わず反転する
    ///
    /// 直前にリモートと同期した値に対してのみ使う。
    pub fn flip(&self) -> (Self, bool) {
        let new_value = !self.is_favorite;
        let next = Self {
            is_favorite: new_value,
            version: self.version,
            state: FavoriteSyncState::OptimisticPending {
                prior: self.is_favorite,
            },
        };
        (next, new_value)
    }

    /// リモート書き込みが確定した
    pub fn confirm(&self, new_version: Version) -> Self {
        Self {
            is_favorite: self.is_favorite,
            version: new_version,
            state: FavoriteSyncState::Synced,
        }
    }

    /// 直前の値に巻き戻す
    pub fn roll_back(&self) -> Self {
        let prior = match self.state {
            FavoriteSyncState::OptimisticPending { prior } => prior,
            _ => self.is_favorite,
        };
        Self {
            is_favorite: prior,
            version: self.version,
            state: FavoriteSyncState::RolledBack,
        }
    }

    /// 巻き戻し後、次の操作を受け付けられる状態にする
    ///
    /// RolledBack 以外の状態はそのまま返す。
    pub fn settle(&self) -> Self {
        match self.state {
            FavoriteSyncState::RolledBack => Self {
                state: FavoriteSyncState::Synced,
                ..*self
            },
            _ => *self,
        }
    }
}
