use crate::domain::{
    FavoriteEntry, RentalRecord,
    value_objects::{IdempotencyKey, Isbn13, UserId, Version},
};
use async_trait::async_trait;
use thiserror::Error;

/// リモートストアのエラー
#[derive(Debug, Error)]
pub enum StoreError {
    /// ネットワーク・接続レベルの失敗
    #[error("transport error")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// 楽観的排他制御による拒否
    ///
    /// 書き込み時に期待したバージョンより、ストアのバージョンが進んでいた。
    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: Version, actual: Version },
}

impl StoreError {
    pub fn transport(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        StoreError::Transport(err.into())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// 書き込みの受領結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAck {
    /// 新たに適用された
    Applied,
    /// 同じ冪等キーで既に適用済みのため何もしなかった
    Duplicate,
}

/// リモート状態ストアポート
///
/// レンタルとお気に入りの永続化を抽象化する。結果整合性のストアを想定し、
/// すべての呼び出しは`StoreError::Transport`で失敗し得る。
#[async_trait]
pub trait RemoteStateStore: Send + Sync {
    /// (ユーザー, 書籍)の Pending / Active なレンタルを取得する
    async fn get_active_rental(
        &self,
        user_id: &UserId,
        isbn13: &Isbn13,
    ) -> Result<Option<RentalRecord>>;

    /// レンタル記録を書き込む（記録IDでupsert）
    ///
    /// 同じ冪等キーでの再送は何もしない（`WriteAck::Duplicate`）。
    /// トランスポート層の再送で記録が重複しないことを保証する。
    async fn write_rental(&self, record: &RentalRecord, key: &IdempotencyKey) -> Result<WriteAck>;

    /// お気に入りエントリを取得する
    async fn get_favorite(&self, user_id: &UserId, isbn13: &Isbn13)
    -> Result<Option<FavoriteEntry>>;

    /// お気に入りを設定する
    ///
    /// ストアのバージョンが`expected_version`と一致する場合のみ書き込み、
    /// 新しいバージョンを返す。一致しない場合は`StoreError::VersionConflict`。
    /// 存在しないエントリのバージョンは`Version::INITIAL`。
    async fn set_favorite(
        &self,
        user_id: &UserId,
        isbn13: &Isbn13,
        value: bool,
        expected_version: Version,
    ) -> Result<Version>;
}
