use crate::domain::value_objects::Version;
use crate::ports::StoreError;
use thiserror::Error;

/// お気に入りアプリケーション層のエラー
#[derive(Debug, Error)]
pub enum FavoriteError {
    /// リモート書き込みに失敗し、ローカル状態を直前の値へ巻き戻した
    #[error("Failed to persist favorite")]
    RemoteWrite(#[source] StoreError),

    /// リモートのバージョンが進んでいたため楽観的更新を破棄した
    ///
    /// ハードな失敗ではない。ローカル状態は既にリモートの正本
    /// （`is_favorite` / `actual`）へ再同期済みで、呼び出し側は再描画すればよい。
    #[error("Favorite was modified elsewhere (expected {expected}, found {actual})")]
    VersionConflict {
        expected: Version,
        actual: Version,
        is_favorite: bool,
    },

    /// 読み取り専用の同期（refresh）での通信失敗
    #[error("Failed to read favorite")]
    Transport(#[source] StoreError),
}

impl FavoriteError {
    /// 競合解消後の正本の値（競合以外はNone）
    pub fn resolved_value(&self) -> Option<bool> {
        match self {
            FavoriteError::VersionConflict { is_favorite, .. } => Some(*is_favorite),
            _ => None,
        }
    }
}

/// アプリケーション層の Result型
pub type Result<T> = std::result::Result<T, FavoriteError>;
