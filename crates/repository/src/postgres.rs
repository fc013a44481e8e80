//! PostgreSQL implementations of the repository traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use model::{
    Customer, Delivery, DropoffAddress, Order, OrderItem, OrderStatus, PaymentProvider,
    PaymentStatus, PickupAddress, TenantSettings,
};
use tokio_postgres::Row;
use tokio_postgres::error::SqlState;

use crate::{
    DeliveriesRepository, OrdersRepository, RepositoryError, TenantSettingsRepository,
};

const ORDER_COLUMNS: &str = r#"
    id, tenant_id, status, currency, subtotal_cents, tax_cents, delivery_fee_cents,
    total_cents, payment_provider, payment_ref, payment_status, delivery_id,
    external_order_ref, customer_name, customer_email, customer_phone,
    dropoff_street, dropoff_city, dropoff_zip, dropoff_note, created_at, updated_at
"#;

/// PostgreSQL implementation of the [`OrdersRepository`] trait.
///
/// Orders and their items are written in one transaction; status changes are
/// conditional updates guarded by the previous status.
pub struct PgOrdersRepository {
    pool: Pool,
}

impl PgOrdersRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn load(&self, order_id: &str) -> Result<Option<Order>, RepositoryError> {
        let client = self.pool.get().await?;
        let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let Some(row) = client.query_opt(&query, &[&order_id]).await? else {
            return Ok(None);
        };
        let mut order = order_from_row(&row)?;

        let rows = client
            .query(
                r#"
                SELECT product_name, unit_price_cents, quantity
                FROM order_items WHERE order_id = $1 ORDER BY position
                "#,
                &[&order_id],
            )
            .await?;
        order.items = rows
            .iter()
            .map(|row| -> Result<OrderItem, RepositoryError> {
                Ok(OrderItem {
                    product_name: row.try_get("product_name")?,
                    unit_price_cents: row.try_get("unit_price_cents")?,
                    quantity: row.try_get("quantity")?,
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Some(order))
    }

    async fn order_exists(&self, order_id: &str) -> Result<bool, RepositoryError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT 1 FROM orders WHERE id = $1", &[&order_id])
            .await?;
        Ok(row.is_some())
    }
}

fn parse_column<T: std::str::FromStr>(row: &Row, column: &str) -> Result<T, RepositoryError> {
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|_| RepositoryError::Corrupt(format!("{column} = {raw}")))
}

fn order_from_row(row: &Row) -> Result<Order, RepositoryError> {
    let payment_provider: Option<String> = row.try_get("payment_provider")?;
    let payment_provider = payment_provider
        .map(|p| {
            p.parse::<PaymentProvider>()
                .map_err(|_| RepositoryError::Corrupt(format!("payment_provider = {p}")))
        })
        .transpose()?;

    Ok(Order {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        status: parse_column::<OrderStatus>(row, "status")?,
        currency: row.try_get("currency")?,
        subtotal_cents: row.try_get("subtotal_cents")?,
        tax_cents: row.try_get("tax_cents")?,
        delivery_fee_cents: row.try_get("delivery_fee_cents")?,
        total_cents: row.try_get("total_cents")?,
        payment_provider,
        payment_ref: row.try_get("payment_ref")?,
        payment_status: parse_column::<PaymentStatus>(row, "payment_status")?,
        delivery_id: row.try_get("delivery_id")?,
        external_order_ref: row.try_get("external_order_ref")?,
        customer: Customer {
            name: row.try_get("customer_name")?,
            email: row.try_get("customer_email")?,
            phone: row.try_get("customer_phone")?,
        },
        dropoff: DropoffAddress {
            street: row.try_get("dropoff_street")?,
            city: row.try_get("dropoff_city")?,
            zip: row.try_get("dropoff_zip")?,
            note: row.try_get("dropoff_note")?,
        },
        items: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl OrdersRepository for PgOrdersRepository {
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let query = r#"
            INSERT INTO orders (
                id, tenant_id, status, currency, subtotal_cents, tax_cents, delivery_fee_cents,
                total_cents, payment_provider, payment_ref, payment_status, delivery_id,
                external_order_ref, customer_name, customer_email, customer_phone,
                dropoff_street, dropoff_city, dropoff_zip, dropoff_note, created_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22)
        "#;
        tx.execute(query, &[
            &order.id,
            &order.tenant_id,
            &order.status.as_str(),
            &order.currency,
            &order.subtotal_cents,
            &order.tax_cents,
            &order.delivery_fee_cents,
            &order.total_cents,
            &order.payment_provider.map(PaymentProvider::as_str),
            &order.payment_ref,
            &order.payment_status.as_str(),
            &order.delivery_id,
            &order.external_order_ref,
            &order.customer.name,
            &order.customer.email,
            &order.customer.phone,
            &order.dropoff.street,
            &order.dropoff.city,
            &order.dropoff.zip,
            &order.dropoff.note,
            &order.created_at,
            &order.updated_at,
        ]).await?;

        let item_query = r#"
            INSERT INTO order_items (order_id, position, product_name, unit_price_cents, quantity)
            VALUES ($1, $2, $3, $4, $5)
        "#;
        for (position, item) in order.items.iter().enumerate() {
            let position = position as i32;
            tx.execute(item_query, &[
                &order.id, &position, &item.product_name, &item.unit_price_cents, &item.quantity,
            ]).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_by_id(&self, order_id: &str) -> Result<Order, RepositoryError> {
        self.load(order_id).await?.ok_or(RepositoryError::NotFound)
    }

    async fn find_by_merchant_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        self.load(reference).await
    }

    async fn compare_and_set_status(
        &self,
        order_id: &str,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<bool, RepositoryError> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE orders SET status = $1, updated_at = $2
                WHERE id = $3 AND status = $4
                "#,
                &[&new.as_str(), &Utc::now(), &order_id, &expected.as_str()],
            )
            .await?;
        if updated == 1 {
            return Ok(true);
        }
        if self.order_exists(order_id).await? {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn record_payment_outcome(
        &self,
        order_id: &str,
        payment_ref: &str,
        outcome: PaymentStatus,
    ) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        let result = client
            .execute(
                r#"
                UPDATE orders SET payment_ref = $1, payment_status = $2, updated_at = $3
                WHERE id = $4
                "#,
                &[&payment_ref, &outcome.as_str(), &Utc::now(), &order_id],
            )
            .await;
        match result {
            Ok(0) => Err(RepositoryError::NotFound),
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                Err(RepositoryError::DuplicatePaymentRef(payment_ref.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn claim_dispatch(
        &self,
        order_id: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE orders SET dispatch_claimed_at = $1
                WHERE id = $2 AND delivery_id IS NULL
                  AND (dispatch_claimed_at IS NULL OR dispatch_claimed_at < $3)
                "#,
                &[&Utc::now(), &order_id, &stale_before],
            )
            .await?;
        if updated == 1 {
            return Ok(true);
        }
        if self.order_exists(order_id).await? {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn release_dispatch(&self, order_id: &str) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE orders SET dispatch_claimed_at = NULL WHERE id = $1",
                &[&order_id],
            )
            .await?;
        Ok(())
    }

    async fn record_delivery_id(&self, delivery: &Delivery) -> Result<bool, RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let updated = tx
            .execute(
                r#"
                UPDATE orders SET delivery_id = $1, dispatch_claimed_at = NULL, updated_at = $2
                WHERE id = $3 AND delivery_id IS NULL
                "#,
                &[&delivery.id, &Utc::now(), &delivery.order_id],
            )
            .await?;
        if updated == 0 {
            tx.rollback().await?;
            return if self.order_exists(&delivery.order_id).await? {
                Ok(false)
            } else {
                Err(RepositoryError::NotFound)
            };
        }

        let query = r#"
            INSERT INTO deliveries (id, order_id, provider, tracking_url, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        "#;
        let inserted = tx
            .execute(query, &[
                &delivery.id,
                &delivery.order_id,
                &delivery.provider,
                &delivery.tracking_url,
                &delivery.status,
                &delivery.created_at,
            ])
            .await;
        match inserted {
            Ok(_) => {}
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                tx.rollback().await?;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn record_external_order_ref(
        &self,
        order_id: &str,
        external_ref: &str,
    ) -> Result<bool, RepositoryError> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE orders SET external_order_ref = $1, updated_at = $2
                WHERE id = $3 AND external_order_ref IS NULL
                "#,
                &[&external_ref, &Utc::now(), &order_id],
            )
            .await?;
        if updated == 1 {
            return Ok(true);
        }
        if self.order_exists(order_id).await? {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound)
        }
    }
}

/// PostgreSQL implementation of the [`DeliveriesRepository`] trait.
pub struct PgDeliveriesRepository {
    pool: Pool,
}

impl PgDeliveriesRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveriesRepository for PgDeliveriesRepository {
    async fn get_by_order_id(&self, order_id: &str) -> Result<Vec<Delivery>, RepositoryError> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT id, order_id, provider, tracking_url, status, created_at
            FROM deliveries WHERE order_id = $1 ORDER BY created_at
        "#;
        let rows = client.query(query, &[&order_id]).await?;
        let mut deliveries = Vec::with_capacity(rows.len());
        for row in rows {
            deliveries.push(Delivery {
                id: row.try_get("id")?,
                order_id: row.try_get("order_id")?,
                provider: row.try_get("provider")?,
                tracking_url: row.try_get("tracking_url")?,
                status: row.try_get("status")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(deliveries)
    }
}

/// PostgreSQL implementation of the [`TenantSettingsRepository`] trait.
pub struct PgTenantSettingsRepository {
    pool: Pool,
}

impl PgTenantSettingsRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantSettingsRepository for PgTenantSettingsRepository {
    async fn get(&self, tenant_id: &str) -> Result<Option<TenantSettings>, RepositoryError> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT tenant_id, pickup_name, pickup_street, pickup_city, pickup_zip, pickup_phone,
                   delivery_enabled, pos_enabled, storyous_merchant_id, storyous_place_id
            FROM tenant_settings WHERE tenant_id = $1
        "#;
        let Some(row) = client.query_opt(query, &[&tenant_id]).await? else {
            return Ok(None);
        };
        Ok(Some(TenantSettings {
            tenant_id: row.try_get("tenant_id")?,
            pickup: PickupAddress {
                name: row.try_get("pickup_name")?,
                street: row.try_get("pickup_street")?,
                city: row.try_get("pickup_city")?,
                zip: row.try_get("pickup_zip")?,
                phone: row.try_get("pickup_phone")?,
            },
            delivery_enabled: row.try_get("delivery_enabled")?,
            pos_enabled: row.try_get("pos_enabled")?,
            storyous_merchant_id: row.try_get("storyous_merchant_id")?,
            storyous_place_id: row.try_get("storyous_place_id")?,
        }))
    }

    async fn upsert(&self, settings: &TenantSettings) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO tenant_settings (
                tenant_id, pickup_name, pickup_street, pickup_city, pickup_zip, pickup_phone,
                delivery_enabled, pos_enabled, storyous_merchant_id, storyous_place_id
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
            ON CONFLICT (tenant_id) DO UPDATE SET
                pickup_name = EXCLUDED.pickup_name,
                pickup_street = EXCLUDED.pickup_street,
                pickup_city = EXCLUDED.pickup_city,
                pickup_zip = EXCLUDED.pickup_zip,
                pickup_phone = EXCLUDED.pickup_phone,
                delivery_enabled = EXCLUDED.delivery_enabled,
                pos_enabled = EXCLUDED.pos_enabled,
                storyous_merchant_id = EXCLUDED.storyous_merchant_id,
                storyous_place_id = EXCLUDED.storyous_place_id
        "#;
        client.execute(query, &[
            &settings.tenant_id,
            &settings.pickup.name,
            &settings.pickup.street,
            &settings.pickup.city,
            &settings.pickup.zip,
            &settings.pickup.phone,
            &settings.delivery_enabled,
            &settings.pos_enabled,
            &settings.storyous_merchant_id,
            &settings.storyous_place_id,
        ]).await?;
        Ok(())
    }
}
