//! Postgres-backed `Store` (feature "postgres").
//!
//! Selected at startup when `DATABASE_URL` is set. Uses runtime-checked
//! queries so the crate builds without a live database; the schema is
//! applied idempotently on connect.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use warden_core::types::*;
use warden_core::Store;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id UUID PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS tools (
    id UUID PRIMARY KEY,
    run_id UUID NOT NULL REFERENCES runs(id),
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ NOT NULL,
    UNIQUE (run_id, name)
);

CREATE TABLE IF NOT EXISTS chats (
    id UUID PRIMARY KEY,
    run_id UUID NOT NULL REFERENCES runs(id),
    provider TEXT NOT NULL,
    request JSONB NOT NULL,
    response JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id UUID PRIMARY KEY,
    run_id UUID NOT NULL REFERENCES runs(id),
    chat_id UUID REFERENCES chats(id),
    seq BIGSERIAL,
    role TEXT NOT NULL,
    kind TEXT NOT NULL,
    content TEXT NOT NULL,
    in_history BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS tool_calls (
    id UUID PRIMARY KEY,
    message_id UUID NOT NULL REFERENCES messages(id),
    tool_id UUID NOT NULL REFERENCES tools(id),
    name TEXT NOT NULL,
    arguments TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS choices (
    id UUID PRIMARY KEY,
    chat_id UUID NOT NULL REFERENCES chats(id),
    message_id UUID NOT NULL REFERENCES messages(id),
    idx INTEGER NOT NULL,
    finish_reason TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chains (
    id UUID PRIMARY KEY,
    tool_id UUID NOT NULL REFERENCES tools(id),
    seq BIGSERIAL,
    name TEXT NOT NULL,
    supervisors TEXT[] NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS chain_executions (
    id UUID PRIMARY KEY,
    chain_id UUID NOT NULL REFERENCES chains(id),
    tool_call_id UUID NOT NULL REFERENCES tool_calls(id),
    status TEXT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    UNIQUE (chain_id, tool_call_id)
);
"#;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and apply the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url)
            .await
            .context("connecting to postgres")?;
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .context("applying schema")?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn role_to_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    }
}

fn role_from_str(raw: &str) -> Result<MessageRole> {
    MessageRole::parse(raw).ok_or_else(|| anyhow!("unknown role in store: {raw:?}"))
}

fn kind_to_str(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Text => "text",
        MessageKind::ImageUrl => "image_url",
    }
}

fn kind_from_str(raw: &str) -> Result<MessageKind> {
    match raw {
        "text" => Ok(MessageKind::Text),
        "image_url" => Ok(MessageKind::ImageUrl),
        _ => Err(anyhow!("unknown message kind in store: {raw:?}")),
    }
}

fn tool_from_row(row: &sqlx::postgres::PgRow) -> Result<Tool> {
    Ok(Tool {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

fn tool_call_from_row(row: &sqlx::postgres::PgRow) -> Result<ToolCall> {
    Ok(ToolCall {
        id: row.try_get("id")?,
        tool_id: row.try_get("tool_id")?,
        name: row.try_get("name")?,
        arguments: row.try_get("arguments")?,
    })
}

fn chain_from_row(row: &sqlx::postgres::PgRow) -> Result<Chain> {
    Ok(Chain {
        id: row.try_get("id")?,
        tool_id: row.try_get("tool_id")?,
        name: row.try_get("name")?,
        supervisors: row.try_get("supervisors")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn insert_message(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    run_id: Uuid,
    chat_id: Uuid,
    message: &Message,
    in_history: bool,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO messages (id, run_id, chat_id, role, kind, content, in_history) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(message.id)
    .bind(run_id)
    .bind(chat_id)
    .bind(role_to_str(message.role))
    .bind(kind_to_str(message.kind))
    .bind(&message.content)
    .bind(in_history)
    .execute(&mut **tx)
    .await?;

    if let Some(calls) = &message.tool_calls {
        for call in calls {
            sqlx::query(
                "INSERT INTO tool_calls (id, message_id, tool_id, name, arguments) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(call.id)
            .bind(message.id)
            .bind(call.tool_id)
            .bind(&call.name)
            .bind(&call.arguments)
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn create_run(&self) -> Result<Run> {
        let run = Run {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        sqlx::query("INSERT INTO runs (id, created_at) VALUES ($1, $2)")
            .bind(run.id)
            .bind(run.created_at)
            .execute(&self.pool)
            .await?;
        Ok(run)
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        let row = sqlx::query("SELECT id, created_at FROM runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(Run {
                id: row.try_get("id")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn create_tool(&self, run_id: Uuid, name: &str, description: &str) -> Result<Tool> {
        let tool = Tool {
            id: Uuid::new_v4(),
            run_id,
            name: name.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO tools (id, run_id, name, description, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(tool.id)
        .bind(tool.run_id)
        .bind(&tool.name)
        .bind(&tool.description)
        .bind(tool.created_at)
        .execute(&self.pool)
        .await?;
        Ok(tool)
    }

    async fn get_tool(&self, id: Uuid) -> Result<Option<Tool>> {
        let row = sqlx::query(
            "SELECT id, run_id, name, description, created_at FROM tools WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| tool_from_row(&row)).transpose()
    }

    async fn get_tool_by_name(&self, run_id: Uuid, name: &str) -> Result<Option<Tool>> {
        let row = sqlx::query(
            "SELECT id, run_id, name, description, created_at FROM tools \
             WHERE run_id = $1 AND name = $2",
        )
        .bind(run_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| tool_from_row(&row)).transpose()
    }

    async fn create_chat(
        &self,
        run_id: Uuid,
        provider: &str,
        request: &serde_json::Value,
        response: &serde_json::Value,
        choices: &[Choice],
        new_messages: &[Message],
    ) -> Result<Uuid> {
        let chat_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO chats (id, run_id, provider, request, response, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(chat_id)
        .bind(run_id)
        .bind(provider)
        .bind(request)
        .bind(response)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        for message in new_messages {
            insert_message(&mut tx, run_id, chat_id, message, true).await?;
        }

        // Every choice's tool calls become reviewable; only the first
        // choice's message joins the run history (the picked choice).
        for (position, choice) in choices.iter().enumerate() {
            insert_message(&mut tx, run_id, chat_id, &choice.message, position == 0).await?;
            sqlx::query(
                "INSERT INTO choices (id, chat_id, message_id, idx, finish_reason) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(choice.id)
            .bind(chat_id)
            .bind(choice.message.id)
            .bind(choice.index as i32)
            .bind(String::from(choice.finish_reason.clone()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(chat_id)
    }

    async fn messages_for_run(&self, run_id: Uuid) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, role, kind, content FROM messages \
             WHERE run_id = $1 AND in_history ORDER BY seq",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows
            .iter()
            .map(|row| row.try_get("id"))
            .collect::<Result<_, _>>()?;

        let call_rows = sqlx::query(
            "SELECT id, message_id, tool_id, name, arguments FROM tool_calls \
             WHERE message_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut calls_by_message: HashMap<Uuid, Vec<ToolCall>> = HashMap::new();
        for row in &call_rows {
            let message_id: Uuid = row.try_get("message_id")?;
            calls_by_message
                .entry(message_id)
                .or_default()
                .push(tool_call_from_row(row)?);
        }

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row.try_get("id")?;
            let role: String = row.try_get("role")?;
            let kind: String = row.try_get("kind")?;
            messages.push(Message {
                id,
                role: role_from_str(&role)?,
                kind: kind_from_str(&kind)?,
                content: row.try_get("content")?,
                tool_calls: calls_by_message.remove(&id),
            });
        }
        Ok(messages)
    }

    async fn get_tool_call(&self, id: Uuid) -> Result<Option<ToolCall>> {
        let row = sqlx::query(
            "SELECT id, tool_id, name, arguments FROM tool_calls WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| tool_call_from_row(&row)).transpose()
    }

    async fn create_chain(
        &self,
        tool_id: Uuid,
        name: &str,
        supervisors: &[String],
    ) -> Result<Chain> {
        let chain = Chain {
            id: Uuid::new_v4(),
            tool_id,
            name: name.to_string(),
            supervisors: supervisors.to_vec(),
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO chains (id, tool_id, name, supervisors, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(chain.id)
        .bind(chain.tool_id)
        .bind(&chain.name)
        .bind(&chain.supervisors)
        .bind(chain.created_at)
        .execute(&self.pool)
        .await?;
        Ok(chain)
    }

    async fn get_chain(&self, id: Uuid) -> Result<Option<Chain>> {
        let row = sqlx::query(
            "SELECT id, tool_id, name, supervisors, created_at FROM chains WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| chain_from_row(&row)).transpose()
    }

    async fn chains_for_tool(&self, tool_id: Uuid) -> Result<Vec<Chain>> {
        let rows = sqlx::query(
            "SELECT id, tool_id, name, supervisors, created_at FROM chains \
             WHERE tool_id = $1 ORDER BY seq",
        )
        .bind(tool_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chain_from_row).collect()
    }

    async fn get_chain_execution(
        &self,
        chain_id: Uuid,
        tool_call_id: Uuid,
    ) -> Result<Option<Uuid>> {
        let row = sqlx::query(
            "SELECT id FROM chain_executions WHERE chain_id = $1 AND tool_call_id = $2",
        )
        .bind(chain_id)
        .bind(tool_call_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| Ok(row.try_get("id")?)).transpose()
    }

    async fn get_chain_execution_status(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<ExecutionStatus>> {
        let row = sqlx::query("SELECT status FROM chain_executions WHERE id = $1")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            let raw: String = row.try_get("status")?;
            ExecutionStatus::parse(&raw)
                .ok_or_else(|| anyhow!("unknown execution status in store: {raw:?}"))
        })
        .transpose()
    }

    async fn record_chain_decision(
        &self,
        chain_id: Uuid,
        tool_call_id: Uuid,
        status: ExecutionStatus,
    ) -> Result<ChainExecution> {
        let row = sqlx::query(
            "INSERT INTO chain_executions (id, chain_id, tool_call_id, status, updated_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (chain_id, tool_call_id) \
             DO UPDATE SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at \
             RETURNING id, chain_id, tool_call_id, status, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(chain_id)
        .bind(tool_call_id)
        .bind(status.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        let raw: String = row.try_get("status")?;
        Ok(ChainExecution {
            id: row.try_get("id")?,
            chain_id: row.try_get("chain_id")?,
            tool_call_id: row.try_get("tool_call_id")?,
            status: ExecutionStatus::parse(&raw)
                .ok_or_else(|| anyhow!("unknown execution status in store: {raw:?}"))?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
