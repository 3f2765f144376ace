use std::path::Path;

use rusqlite::{params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::database::schema::{
    self, Column, ANNOTATION_DE, ANNOTATION_EN, ANNOTATION_FR, DESCRIPTION_COLUMN, IMAGE_COLUMN,
    ITEMS_TABLE,
};
use crate::error::{PipelineError, Result};
use crate::ingest::item::{Item, Scalar};
use crate::ml::annotation::{Annotation, ArticleContext};

/// Rows come back in the same shape as catalog items.
pub type Row = Item;

/// An item's id and its small-image reference, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    pub id: i64,
    pub reference: Option<String>,
}

/// Thin wrapper over the SQLite handle. Opened once per run.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        debug!("Opened store at {:?}", path);
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| PipelineError::Store(e))
    }

    /// Runs a read query and returns every row with its column names.
    pub fn query(&self, sql: &str, params: &[Scalar]) -> Result<Vec<Row>> {
        let mut stmt = self.conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            let mut item = Item::default();
            for (i, name) in names.iter().enumerate() {
                item.push(name.clone(), row.get::<_, Scalar>(i)?);
            }
            Ok(item)
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn execute(&self, sql: &str, params: &[Scalar]) -> Result<usize> {
        Ok(self.conn.execute(sql, params_from_iter(params.iter()))?)
    }

    pub fn create_table(&self, columns: &[Column]) -> Result<()> {
        self.conn
            .execute_batch(&schema::create_table_sql(columns))
            .map_err(|e| PipelineError::Load(format!("failed to create table: {}", e)))
    }

    /// Inserts every item in order, all or nothing.
    ///
    /// Values are looked up by column name; fields the item lacks are NULL
    /// and fields outside `columns` are dropped.
    pub fn load_all(&mut self, items: &[Item], columns: &[Column]) -> Result<usize> {
        let load_err = |e: rusqlite::Error| PipelineError::Load(e.to_string());

        let tx = self.conn.transaction().map_err(load_err)?;
        {
            let mut stmt = tx.prepare(&schema::insert_sql(columns)).map_err(load_err)?;

            for (index, item) in items.iter().enumerate() {
                let values = columns
                    .iter()
                    .map(|c| item.get(&c.name).cloned().unwrap_or(Scalar::Null))
                    .chain(std::iter::repeat(Scalar::Null).take(3));

                stmt.execute(params_from_iter(values)).map_err(|e| {
                    PipelineError::Load(format!("insert of item {} failed: {}", index, e))
                })?;
            }
        }
        tx.commit().map_err(load_err)?;

        Ok(items.len())
    }

    pub fn image_refs(&self) -> Result<Vec<ImageRef>> {
        let sql = format!("SELECT id, {} FROM {}", IMAGE_COLUMN, ITEMS_TABLE);
        let mut stmt = self.conn.prepare(&sql)?;

        let refs = stmt.query_map([], |row| {
            let reference: Scalar = row.get(1)?;
            Ok(ImageRef {
                id: row.get(0)?,
                reference: reference.to_text().filter(|r| !r.is_empty()),
            })
        })?;

        Ok(refs.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn annotation(&self, id: i64) -> Result<Option<Annotation>> {
        let sql = format!(
            "SELECT {}, {}, {} FROM {} WHERE id = ?1",
            ANNOTATION_EN, ANNOTATION_FR, ANNOTATION_DE, ITEMS_TABLE
        );

        let annotation = self
            .conn
            .query_row(&sql, [id], |row| {
                Ok(Annotation {
                    en: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    fr: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    de: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })
            .optional()?;

        Ok(annotation)
    }

    pub fn article_context(&self, id: i64) -> Result<Option<ArticleContext>> {
        let sql = format!(
            "SELECT id, {} FROM {} WHERE id = ?1",
            DESCRIPTION_COLUMN, ITEMS_TABLE
        );

        let context = self
            .conn
            .query_row(&sql, [id], |row| {
                let description: Scalar = row.get(1)?;
                Ok(ArticleContext {
                    id: row.get(0)?,
                    description: description.to_text().filter(|d| !d.is_empty()),
                })
            })
            .optional()?;

        Ok(context)
    }

    /// Writes all three languages in one statement.
    pub fn update_annotation(&self, id: i64, annotation: &Annotation) -> Result<usize> {
        let sql = format!(
            "UPDATE {} SET {} = ?1, {} = ?2, {} = ?3 WHERE id = ?4",
            ITEMS_TABLE, ANNOTATION_EN, ANNOTATION_FR, ANNOTATION_DE
        );
        self.execute(
            &sql,
            &[
                Scalar::Text(annotation.en.clone()),
                Scalar::Text(annotation.fr.clone()),
                Scalar::Text(annotation.de.clone()),
                Scalar::Integer(id),
            ],
        )
    }
}

/// Stage 2: freeze the schema from the first record, create the table and
/// load the whole catalog.
pub fn sync_catalog(store: &mut Store, items: &[Item]) -> Result<usize> {
    let sample = items
        .first()
        .ok_or_else(|| PipelineError::Load("catalog is empty".to_string()))?;

    let columns = schema::infer_columns(sample);
    info!("Inferred {} columns from the first record", columns.len());

    store.create_table(&columns)?;
    let inserted = store.load_all(items, &columns)?;
    info!("Inserted {} items", inserted);

    Ok(inserted)
}
