use crate::domain::{
    FavoriteEntry, RentalRecord, RentalStatus,
    value_objects::{IdempotencyKey, Isbn13, RentalFee, RentalId, UserId, Version},
};
use crate::ports::remote_state_store::{
    RemoteStateStore as RemoteStateStoreTrait, Result, StoreError, WriteAck,
};
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::str::FromStr;

fn transport(err: sqlx::Error) -> StoreError {
    StoreError::transport(err)
}

/// PostgreSQLの行データをRentalRecordに変換する
fn map_row_to_rental(row: &PgRow) -> Result<RentalRecord> {
    let status_str: &str = row.get("status");
    let status = RentalStatus::from_str(status_str).map_err(|e| {
        StoreError::transport(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;

    Ok(RentalRecord {
        id: RentalId::from_uuid(row.get("rental_id")),
        user_id: UserId::new(row.get::<String, _>("user_id")),
        isbn13: Isbn13::new(row.get::<String, _>("isbn13")),
        title: row.get("title"),
        start_date: row.get("start_date"),
        due_date: row.get("due_date"),
        fee: RentalFee::from_cents(row.get("fee_cents")),
        label: row.get("label"),
        status,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn version_from_db(value: i64) -> Version {
    Version::new(u64::try_from(value).unwrap_or_default())
}

fn version_to_db(version: Version) -> i64 {
    i64::try_from(version.value()).unwrap_or(i64::MAX)
}

/// RemoteStateStoreのPostgreSQL実装
///
/// - レンタル: 冪等キーを`rental_writes`に記録し、同じキーの再送は何もしない
/// - お気に入り: `version`列の条件付きUPDATEによる楽観的排他制御
pub struct RemoteStateStore {
    pool: PgPool,
}

impl RemoteStateStore {
    /// PostgreSQLコネクションプールから新しいRemoteStateStoreを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_favorite_version(&self, user_id: &UserId, isbn13: &Isbn13) -> Result<Version> {
        let version: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT version FROM favorites
            WHERE user_id = $1 AND isbn13 = $2
            "#,
        )
        .bind(user_id.as_str())
        .bind(isbn13.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(transport)?;

        Ok(version.map(version_from_db).unwrap_or(Version::INITIAL))
    }
}

#[async_trait]
impl RemoteStateStoreTrait for RemoteStateStore {
    /// 未終了のレンタルを取得する
    ///
    /// 部分インデックス（status IN pending, active）を使用する。
    /// 複数ある場合は最も新しく更新されたものを返す。
    async fn get_active_rental(
        &self,
        user_id: &UserId,
        isbn13: &Isbn13,
    ) -> Result<Option<RentalRecord>> {
        let row = sqlx::query(
            r#"
            SELECT
                rental_id, user_id, isbn13, title, start_date, due_date,
                fee_cents, label, status, created_at, updated_at
            FROM rentals
            WHERE user_id = $1
              AND isbn13 = $2
              AND status IN ('pending', 'active')
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id.as_str())
        .bind(isbn13.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(transport)?;

        row.as_ref().map(map_row_to_rental).transpose()
    }

    /// レンタル記録を書き込む
    ///
    /// 冪等キーの登録とupsertを1トランザクションで行う。
    /// キーが登録済みなら何もしない。終端状態（active / failed）の記録は更新しない。
    async fn write_rental(&self, record: &RentalRecord, key: &IdempotencyKey) -> Result<WriteAck> {
        let mut tx = self.pool.begin().await.map_err(transport)?;

        let claimed = sqlx::query(
            r#"
            INSERT INTO rental_writes (idempotency_key, rental_id)
            VALUES ($1, $2)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(key.as_str())
        .bind(record.id.value())
        .execute(&mut *tx)
        .await
        .map_err(transport)?
        .rows_affected();

        if claimed == 0 {
            tx.commit().await.map_err(transport)?;
            return Ok(WriteAck::Duplicate);
        }

        sqlx::query(
            r#"
            INSERT INTO rentals (
                rental_id,
                user_id,
                isbn13,
                title,
                start_date,
                due_date,
                fee_cents,
                label,
                status,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (rental_id)
            DO UPDATE SET
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            WHERE rentals.status = 'pending'
            "#,
        )
        .bind(record.id.value())
        .bind(record.user_id.as_str())
        .bind(record.isbn13.as_str())
        .bind(&record.title)
        .bind(record.start_date)
        .bind(record.due_date)
        .bind(record.fee.cents())
        .bind(&record.label)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(transport)?;

        tx.commit().await.map_err(transport)?;
        Ok(WriteAck::Applied)
    }

    async fn get_favorite(
        &self,
        user_id: &UserId,
        isbn13: &Isbn13,
    ) -> Result<Option<FavoriteEntry>> {
        let row = sqlx::query(
            r#"
            SELECT is_favorite, version FROM favorites
            WHERE user_id = $1 AND isbn13 = $2
            "#,
        )
        .bind(user_id.as_str())
        .bind(isbn13.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(transport)?;

        Ok(row.map(|row| FavoriteEntry {
            user_id: user_id.clone(),
            isbn13: isbn13.clone(),
            is_favorite: row.get("is_favorite"),
            version: version_from_db(row.get("version")),
        }))
    }

    /// お気に入りを条件付きで書き込む
    ///
    /// 期待バージョンが0なら行の新規作成、それ以外は`version`一致時のみ更新する。
    /// どちらも行が返らなければ競合として現在のバージョンを報告する。
    async fn set_favorite(
        &self,
        user_id: &UserId,
        isbn13: &Isbn13,
        value: bool,
        expected_version: Version,
    ) -> Result<Version> {
        let written: Option<i64> = if expected_version == Version::INITIAL {
            sqlx::query_scalar(
                r#"
                INSERT INTO favorites (user_id, isbn13, is_favorite, version, updated_at)
                VALUES ($1, $2, $3, 1, NOW())
                ON CONFLICT (user_id, isbn13) DO NOTHING
                RETURNING version
                "#,
            )
            .bind(user_id.as_str())
            .bind(isbn13.as_str())
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(transport)?
        } else {
            sqlx::query_scalar(
                r#"
                UPDATE favorites
                SET is_favorite = $3,
                    version = version + 1,
                    updated_at = NOW()
                WHERE user_id = $1 AND isbn13 = $2 AND version = $4
                RETURNING version
                "#,
            )
            .bind(user_id.as_str())
            .bind(isbn13.as_str())
            .bind(value)
            .bind(version_to_db(expected_version))
            .fetch_optional(&self.pool)
            .await
            .map_err(transport)?
        };

        match written {
            Some(version) => Ok(version_from_db(version)),
            None => Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: self.current_favorite_version(user_id, isbn13).await?,
            }),
        }
    }
}
