use async_trait::async_trait;
use common::{Money, ShowId, TicketId};
use sqlx::Row;
use sqlx::postgres::PgRow;
use store::{PgTransaction, Result, StoreError};

use crate::entities::{Booking, Show, Ticket};
use crate::tables::BookingTx;

const SHOW_COLUMNS: &str = "id, external_id, number_of_tickets, start_time, title, venue";

fn row_to_show(row: PgRow) -> Result<Show> {
    let number_of_tickets: i32 = row.try_get("number_of_tickets")?;

    Ok(Show {
        id: ShowId::from_uuid(row.try_get("id")?),
        external_id: row.try_get("external_id")?,
        // Guarded by a CHECK constraint.
        number_of_tickets: u32::try_from(number_of_tickets).unwrap_or(0),
        start_time: row.try_get("start_time")?,
        title: row.try_get("title")?,
        venue: row.try_get("venue")?,
    })
}

fn seat_count(number_of_tickets: u32) -> Result<i32> {
    i32::try_from(number_of_tickets)
        .map_err(|_| StoreError::InvalidEntry("number_of_tickets does not fit the column"))
}

fn row_to_ticket(row: PgRow) -> Result<Ticket> {
    Ok(Ticket {
        ticket_id: TicketId::new(row.try_get::<String, _>("ticket_id")?),
        price: Money::new(
            row.try_get::<String, _>("price_amount")?,
            row.try_get::<String, _>("price_currency")?,
        ),
        customer_email: row.try_get("customer_email")?,
    })
}

#[async_trait]
impl BookingTx for PgTransaction {
    async fn find_show(&mut self, id: ShowId) -> Result<Option<Show>> {
        let sql = format!("SELECT {SHOW_COLUMNS} FROM shows WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(self.connection())
            .await?;

        row.map(row_to_show).transpose()
    }

    async fn lock_show(&mut self, id: ShowId) -> Result<Option<Show>> {
        let sql = format!("SELECT {SHOW_COLUMNS} FROM shows WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(self.connection())
            .await?;

        row.map(row_to_show).transpose()
    }

    async fn insert_show(&mut self, show: &Show) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO shows (id, external_id, number_of_tickets, start_time, title, venue)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(show.id.as_uuid())
        .bind(show.external_id)
        .bind(seat_count(show.number_of_tickets)?)
        .bind(show.start_time)
        .bind(&show.title)
        .bind(&show.venue)
        .execute(self.connection())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn allocated_seats(&mut self, show_id: ShowId) -> Result<u64> {
        let allocated: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(number_of_tickets), 0)::BIGINT FROM bookings WHERE show_id = $1",
        )
        .bind(show_id.as_uuid())
        .fetch_one(self.connection())
        .await?;

        Ok(allocated.max(0) as u64)
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO bookings (id, show_id, number_of_tickets, customer_email)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(booking.id.as_uuid())
        .bind(booking.show_id.as_uuid())
        .bind(seat_count(booking.number_of_tickets)?)
        .bind(&booking.customer_email)
        .execute(self.connection())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO tickets (ticket_id, price_amount, price_currency, customer_email)
            VALUES ($1, $2::numeric, $3, $4)
            ON CONFLICT (ticket_id) DO NOTHING
            "#,
        )
        .bind(ticket.ticket_id.as_str())
        .bind(&ticket.price.amount)
        .bind(&ticket.price.currency)
        .bind(&ticket.customer_email)
        .execute(self.connection())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_ticket(&mut self, ticket_id: &TicketId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tickets WHERE ticket_id = $1")
            .bind(ticket_id.as_str())
            .execute(self.connection())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_tickets(&mut self) -> Result<Vec<Ticket>> {
        let rows = sqlx::query(
            r#"
            SELECT ticket_id, price_amount::text AS price_amount,
                   price_currency::text AS price_currency, customer_email
            FROM tickets
            ORDER BY ticket_id
            "#,
        )
        .fetch_all(self.connection())
        .await?;

        rows.into_iter().map(row_to_ticket).collect()
    }
}
