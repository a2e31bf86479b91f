//! Schema catalog.
//!
//! The catalog is a B-tree rooted at `Header::schema_root`, keyed by the
//! lowercase table name. Each value is a record describing one table:
//!
//! ```text
//! table: "table", name, root, autoincrement, ncols,
//!        (name, type | NULL, flags, default)*
//! fts:   "fts", name, content, terms, docsize, module, tokenizer,
//!        language | NULL, ncols, name*, nargs, arg*
//! ```
//!
//! Column flags: 1 = primary key, 2 = not null, 4 = unique.
//! Every schema change bumps `Header::schema_cookie`.

use crate::btree::{self, Cursor};
use crate::error::{DbError, DbResult};
use crate::fts::{FtsIndex, FtsRoots, Language, TokenizerSpec};
use crate::pager::{PageRead, PageWrite};
use crate::record::{decode_record, encode_record};
use crate::value::{Affinity, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const FLAG_PRIMARY_KEY: i64 = 1;
const FLAG_NOT_NULL: i64 = 2;
const FLAG_UNIQUE: i64 = 4;

/// A column of an ordinary table.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Name as declared.
    pub name: String,
    /// Declared type.
    pub type_name: Option<String>,
    /// Affinity derived from the declared type.
    pub affinity: Affinity,
    /// Part of the primary key.
    pub primary_key: bool,
    /// `NOT NULL`
    pub not_null: bool,
    /// `UNIQUE`, or a single-column primary key that is not the row id.
    pub unique: bool,
    /// Value stored when an insert omits the column.
    pub default: Value,
}

/// An ordinary table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    /// Name as declared.
    pub name: String,
    /// Root page of the row tree.
    pub root: u32,
    /// Columns in declaration order.
    pub columns: Vec<Column>,
    /// Column that aliases the row id (`INTEGER PRIMARY KEY`).
    pub rowid_alias: Option<usize>,
    /// Declared with `AUTOINCREMENT`.
    pub autoincrement: bool,
}

impl TableDef {
    /// Position of a column by case-insensitive name.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Returns true if any column needs a uniqueness check on write.
    #[must_use]
    pub fn has_unique(&self) -> bool {
        self.columns.iter().any(|c| c.unique)
    }
}

/// A full-text table.
#[derive(Debug, Clone, PartialEq)]
pub struct FtsDef {
    /// Name as declared.
    pub name: String,
    /// `fts3` or `fts4`.
    pub module: String,
    /// User columns.
    pub columns: Vec<String>,
    /// Root pages.
    pub roots: FtsRoots,
    /// Tokenizer fixed at creation.
    pub tokenizer: TokenizerSpec,
    /// Tokenizer arguments as written.
    pub args: Vec<String>,
}

impl FtsDef {
    /// Position of a user column by case-insensitive name.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Binds the table to its tokenizer.
    pub fn index(&self) -> DbResult<FtsIndex> {
        Ok(FtsIndex::new(
            self.name.clone(),
            self.columns.clone(),
            self.roots,
            self.tokenizer.instantiate()?,
        ))
    }
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaEntry {
    /// Ordinary table.
    Table(Arc<TableDef>),
    /// Full-text table.
    Fts(Arc<FtsDef>),
}

impl SchemaEntry {
    /// Table name as declared.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Table(t) => &t.name,
            Self::Fts(f) => &f.name,
        }
    }

    /// Every root page the entry owns.
    #[must_use]
    pub fn roots(&self) -> Vec<u32> {
        match self {
            Self::Table(t) => vec![t.root],
            Self::Fts(f) => vec![f.roots.content, f.roots.terms, f.roots.docsize],
        }
    }
}

/// The catalog as of one snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    cookie: u32,
    entries: BTreeMap<String, SchemaEntry>,
}

struct Fields {
    values: std::vec::IntoIter<Value>,
}

impl Fields {
    fn next(&mut self) -> DbResult<Value> {
        self.values
            .next()
            .ok_or_else(|| DbError::malformed("schema record is too short"))
    }

    fn text(&mut self) -> DbResult<String> {
        match self.next()? {
            Value::Text(s) => Ok(s),
            other => Err(DbError::malformed(format!(
                "schema field should be text, found {}",
                other.type_name()
            ))),
        }
    }

    fn opt_text(&mut self) -> DbResult<Option<String>> {
        match self.next()? {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s)),
            other => Err(DbError::malformed(format!(
                "schema field should be text, found {}",
                other.type_name()
            ))),
        }
    }

    fn int(&mut self) -> DbResult<i64> {
        match self.next()? {
            Value::Integer(i) => Ok(i),
            other => Err(DbError::malformed(format!(
                "schema field should be an integer, found {}",
                other.type_name()
            ))),
        }
    }

    fn page(&mut self) -> DbResult<u32> {
        u32::try_from(self.int()?).map_err(|_| DbError::malformed("schema root page out of range"))
    }

    fn count(&mut self) -> DbResult<usize> {
        usize::try_from(self.int()?).map_err(|_| DbError::malformed("negative schema count"))
    }
}

fn encode_table(def: &TableDef) -> Vec<u8> {
    let mut values = vec![
        Value::from("table"),
        Value::from(def.name.as_str()),
        Value::Integer(i64::from(def.root)),
        Value::Integer(i64::from(def.autoincrement)),
        Value::Integer(def.columns.len() as i64),
    ];
    for column in &def.columns {
        let mut flags = 0;
        if column.primary_key {
            flags |= FLAG_PRIMARY_KEY;
        }
        if column.not_null {
            flags |= FLAG_NOT_NULL;
        }
        if column.unique {
            flags |= FLAG_UNIQUE;
        }
        values.push(Value::from(column.name.as_str()));
        values.push(Value::from(column.type_name.clone()));
        values.push(Value::Integer(flags));
        values.push(column.default.clone());
    }
    encode_record(&values)
}

fn encode_fts(def: &FtsDef) -> Vec<u8> {
    let mut values = vec![
        Value::from("fts"),
        Value::from(def.name.as_str()),
        Value::Integer(i64::from(def.roots.content)),
        Value::Integer(i64::from(def.roots.terms)),
        Value::Integer(i64::from(def.roots.docsize)),
        Value::from(def.module.as_str()),
        Value::from(def.tokenizer.name.as_str()),
        Value::from(def.tokenizer.language.map(Language::name)),
        Value::Integer(def.columns.len() as i64),
    ];
    values.extend(def.columns.iter().map(|c| Value::from(c.as_str())));
    values.push(Value::Integer(def.args.len() as i64));
    values.extend(def.args.iter().map(|a| Value::from(a.as_str())));
    encode_record(&values)
}

fn decode_entry(raw: &[u8]) -> DbResult<SchemaEntry> {
    let mut f = Fields {
        values: decode_record(raw)?.into_iter(),
    };
    match f.text()?.as_str() {
        "table" => {
            let name = f.text()?;
            let root = f.page()?;
            let autoincrement = f.int()? != 0;
            let ncols = f.count()?;
            let mut columns = Vec::with_capacity(ncols.min(2000));
            for _ in 0..ncols {
                let name = f.text()?;
                let type_name = f.opt_text()?;
                let flags = f.int()?;
                let default = f.next()?;
                columns.push(Column {
                    affinity: Affinity::from_declared_type(type_name.as_deref()),
                    name,
                    type_name,
                    primary_key: flags & FLAG_PRIMARY_KEY != 0,
                    not_null: flags & FLAG_NOT_NULL != 0,
                    unique: flags & FLAG_UNIQUE != 0,
                    default,
                });
            }
            let rowid_alias = rowid_alias(&columns);
            Ok(SchemaEntry::Table(Arc::new(TableDef {
                name,
                root,
                columns,
                rowid_alias,
                autoincrement,
            })))
        }
        "fts" => {
            let name = f.text()?;
            let roots = FtsRoots {
                content: f.page()?,
                terms: f.page()?,
                docsize: f.page()?,
            };
            let module = f.text()?;
            let tokenizer = f.text()?;
            let language = f.opt_text()?.map(|l| l.parse::<Language>()).transpose()?;
            let ncols = f.count()?;
            let columns = (0..ncols).map(|_| f.text()).collect::<DbResult<Vec<_>>>()?;
            let nargs = f.count()?;
            let args = (0..nargs).map(|_| f.text()).collect::<DbResult<Vec<_>>>()?;
            Ok(SchemaEntry::Fts(Arc::new(FtsDef {
                name,
                module,
                columns,
                roots,
                tokenizer: TokenizerSpec {
                    name: tokenizer,
                    language,
                },
                args,
            })))
        }
        other => Err(DbError::malformed(format!("unknown schema entry kind \"{other}\""))),
    }
}

/// The column aliasing the row id: the sole primary-key column, declared
/// exactly `INTEGER`.
#[must_use]
pub fn rowid_alias(columns: &[Column]) -> Option<usize> {
    let mut keys = columns.iter().enumerate().filter(|(_, c)| c.primary_key);
    match (keys.next(), keys.next()) {
        (Some((i, c)), None)
            if c.type_name
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case("integer")) =>
        {
            Some(i)
        }
        _ => None,
    }
}

impl Schema {
    /// Reads the catalog visible to `view`.
    pub fn load<P: PageRead + ?Sized>(view: &P) -> DbResult<Self> {
        let header = view.header();
        let mut schema = Self {
            cookie: header.schema_cookie,
            entries: BTreeMap::new(),
        };
        if header.schema_root == 0 {
            return Ok(schema);
        }
        let mut cursor = Cursor::new(view, header.schema_root);
        cursor.first()?;
        while let Some(key) = cursor.key() {
            let key = String::from_utf8(key.to_vec())
                .map_err(|_| DbError::malformed("schema key is not UTF-8"))?;
            let entry = decode_entry(&cursor.value()?)?;
            schema.entries.insert(key, entry);
            cursor.next()?;
        }
        Ok(schema)
    }

    /// Schema cookie the catalog was loaded at.
    #[must_use]
    pub fn cookie(&self) -> u32 {
        self.cookie
    }

    /// Looks up a table by case-insensitive name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SchemaEntry> {
        self.entries.get(&name.to_ascii_lowercase())
    }

    /// Looks up a table, failing with a compile error when absent.
    pub fn require(&self, name: &str) -> DbResult<&SchemaEntry> {
        self.get(name)
            .ok_or_else(|| DbError::compile(format!("no such table: {name}")))
    }

    /// All entries in name order.
    pub fn entries(&self) -> impl Iterator<Item = &SchemaEntry> {
        self.entries.values()
    }
}

/// Creates the catalog tree of a new database.
pub fn init<W: PageWrite + ?Sized>(tx: &mut W) -> DbResult<()> {
    if tx.header().schema_root == 0 {
        let root = btree::create(tx)?;
        tx.header_mut().schema_root = root;
    }
    Ok(())
}

fn put<W: PageWrite + ?Sized>(tx: &mut W, name: &str, record: &[u8]) -> DbResult<()> {
    init(tx)?;
    let root = tx.header().schema_root;
    let key = name.to_ascii_lowercase();
    if btree::get(tx, root, key.as_bytes())?.is_some() {
        return Err(DbError::compile(format!("table {name} already exists")));
    }
    btree::insert(tx, root, key.as_bytes(), record)?;
    bump_cookie(tx);
    Ok(())
}

fn bump_cookie<W: PageWrite + ?Sized>(tx: &mut W) {
    let header = tx.header_mut();
    header.schema_cookie = header.schema_cookie.wrapping_add(1);
}

/// Adds an ordinary table to the catalog.
pub fn add_table<W: PageWrite + ?Sized>(tx: &mut W, def: &TableDef) -> DbResult<()> {
    put(tx, &def.name, &encode_table(def))
}

/// Adds a full-text table to the catalog.
pub fn add_fts<W: PageWrite + ?Sized>(tx: &mut W, def: &FtsDef) -> DbResult<()> {
    put(tx, &def.name, &encode_fts(def))
}

/// Removes a table from the catalog. The caller frees its pages.
pub fn remove<W: PageWrite + ?Sized>(tx: &mut W, name: &str) -> DbResult<bool> {
    let root = tx.header().schema_root;
    if root == 0 {
        return Ok(false);
    }
    let removed = btree::delete(tx, root, name.to_ascii_lowercase().as_bytes())?;
    if removed {
        bump_cookie(tx);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pager::{Pager, WriteTxn};

    fn txn() -> WriteTxn {
        let pager = Arc::new(Pager::open(None, None, &Config::default()).unwrap());
        pager.begin_write()
    }

    fn column(name: &str, type_name: Option<&str>) -> Column {
        Column {
            name: name.into(),
            type_name: type_name.map(Into::into),
            affinity: Affinity::from_declared_type(type_name),
            primary_key: false,
            not_null: false,
            unique: false,
            default: Value::Null,
        }
    }

    #[test]
    fn tables_survive_a_reload() {
        let mut tx = txn();
        let root = btree::create(&mut tx).unwrap();
        let mut id = column("id", Some("INTEGER"));
        id.primary_key = true;
        let mut name = column("name", Some("TEXT"));
        name.not_null = true;
        name.default = Value::from("anon");
        let def = TableDef {
            name: "People".into(),
            root,
            rowid_alias: rowid_alias(&[id.clone(), name.clone()]),
            columns: vec![id, name],
            autoincrement: true,
        };
        add_table(&mut tx, &def).unwrap();

        let schema = Schema::load(&tx).unwrap();
        assert_eq!(schema.cookie(), 1);
        match schema.get("people").unwrap() {
            SchemaEntry::Table(t) => {
                assert_eq!(**t, def);
                assert_eq!(t.rowid_alias, Some(0));
            }
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[test]
    fn fts_tables_keep_their_tokenizer() {
        let mut tx = txn();
        let roots = FtsIndex::create_trees(&mut tx).unwrap();
        let def = FtsDef {
            name: "docs".into(),
            module: "fts4".into(),
            columns: vec!["title".into(), "body".into()],
            roots,
            tokenizer: TokenizerSpec {
                name: "HTMLTokenizer".into(),
                language: Some(Language::Spanish),
            },
            args: vec!["stemmer=spa".into()],
        };
        add_fts(&mut tx, &def).unwrap();
        let schema = Schema::load(&tx).unwrap();
        assert_eq!(schema.get("DOCS"), Some(&SchemaEntry::Fts(Arc::new(def))));
    }

    #[test]
    fn duplicate_names_and_removal() {
        let mut tx = txn();
        let root = btree::create(&mut tx).unwrap();
        let def = TableDef {
            name: "t".into(),
            root,
            columns: vec![column("x", None)],
            rowid_alias: None,
            autoincrement: false,
        };
        add_table(&mut tx, &def).unwrap();
        assert!(add_table(&mut tx, &TableDef { name: "T".into(), ..def.clone() }).is_err());
        assert!(remove(&mut tx, "T").unwrap());
        assert!(!remove(&mut tx, "t").unwrap());
        assert_eq!(Schema::load(&tx).unwrap().entries().count(), 0);
        assert_eq!(tx.header().schema_cookie, 2);
    }

    #[test]
    fn only_integer_primary_keys_alias_the_rowid() {
        let mut a = column("a", Some("INT"));
        a.primary_key = true;
        assert_eq!(rowid_alias(&[a]), None);
        let mut b = column("b", Some("integer"));
        b.primary_key = true;
        let mut c = column("c", Some("integer"));
        c.primary_key = true;
        assert_eq!(rowid_alias(&[b.clone()]), Some(0));
        assert_eq!(rowid_alias(&[b, c]), None);
    }
}
