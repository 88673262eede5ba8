//! Table aliases and the joins between them.
//!
//! Every table occurrence in a query gets an alias. The first occurrence of
//! a table is aliased by its own name, later ones by `<prefix><n>`. Each
//! alias carries a reference count: clauses that use a column of the alias
//! hold a reference, and an alias whose count drops to zero is left out of
//! the FROM clause.
//!
//! Joins are looked up in a keyed cache before a new alias is allocated.
//! The key is the left-hand alias plus the join condition, so the same
//! relation followed from the same place maps to the same alias unless the
//! caller asks for a fresh one.

use std::collections::{HashMap, HashSet};

/// How a joined table is attached to the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum JoinType {
    /// INNER JOIN.
    Inner,
    /// LEFT OUTER JOIN.
    LeftOuter,
}

impl JoinType {
    /// Returns the SQL keyword for this join type.
    pub const fn sql_keyword(&self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::LeftOuter => "LEFT OUTER JOIN",
        }
    }
}

/// The join cache key: where a join starts and how it matches rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinKey {
    /// Alias on the left-hand side.
    pub lhs_alias: String,
    /// The joined table.
    pub table: String,
    /// Column of the left-hand alias.
    pub lhs_col: String,
    /// Column of the joined table.
    pub rhs_col: String,
}

/// One alias in the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasEntry {
    /// The physical table.
    pub table: String,
    /// The alias itself.
    pub alias: String,
    /// `None` for the base table; otherwise how it is joined.
    pub join_type: Option<JoinType>,
    /// Left-hand alias of the join condition.
    pub lhs_alias: Option<String>,
    /// Left-hand column of the join condition.
    pub lhs_col: Option<String>,
    /// Right-hand column of the join condition.
    pub rhs_col: Option<String>,
    /// Whether the relation may be absent for a left-hand row.
    pub nullable: bool,
    /// Number of clauses using this alias.
    pub refcount: usize,
}

impl AliasEntry {
    fn key(&self) -> Option<JoinKey> {
        match (&self.lhs_alias, &self.lhs_col, &self.rhs_col) {
            (Some(lhs_alias), Some(lhs_col), Some(rhs_col)) => Some(JoinKey {
                lhs_alias: lhs_alias.clone(),
                table: self.table.clone(),
                lhs_col: lhs_col.clone(),
                rhs_col: rhs_col.clone(),
            }),
            _ => None,
        }
    }
}

/// When an existing join may be returned instead of creating a new one.
#[derive(Debug, Clone, Copy)]
pub enum Reuse<'a> {
    /// Any cached join with the same key.
    Always,
    /// Only cached joins whose alias is in the set.
    Only(&'a HashSet<String>),
    /// Any cached join whose alias is not in the set.
    Except(&'a HashSet<String>),
    /// Always create a new alias.
    Never,
}

/// Options for [`JoinManager::join`].
#[derive(Debug, Clone, Copy)]
pub struct JoinOptions<'a> {
    /// Which cached joins may be reused.
    pub reuse: Reuse<'a>,
    /// Promote the join to LEFT OUTER whether new or reused.
    pub promote: bool,
    /// Make a newly created join LEFT OUTER.
    pub outer_if_first: bool,
    /// Whether the relation may be absent.
    pub nullable: bool,
}

impl Default for JoinOptions<'_> {
    fn default() -> Self {
        Self {
            reuse: Reuse::Always,
            promote: false,
            outer_if_first: false,
            nullable: false,
        }
    }
}

/// The alias map of one query.
#[derive(Debug, Clone)]
pub struct JoinManager {
    prefix: String,
    entries: HashMap<String, AliasEntry>,
    tables: Vec<String>,
    table_map: HashMap<String, Vec<String>>,
    join_cache: HashMap<JoinKey, Vec<String>>,
}

impl JoinManager {
    /// Creates a manager whose base alias is `base_table`, with one reference.
    pub fn new(base_table: &str) -> Self {
        let mut manager = Self {
            prefix: "T".to_string(),
            entries: HashMap::new(),
            tables: Vec::new(),
            table_map: HashMap::new(),
            join_cache: HashMap::new(),
        };
        manager.table_alias(base_table, true);
        manager
    }

    /// The alias prefix used for repeated tables.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The base table's alias.
    pub fn base_alias(&self) -> &str {
        self.tables.first().map_or("", String::as_str)
    }

    /// Looks up an alias.
    pub fn get(&self, alias: &str) -> Option<&AliasEntry> {
        self.entries.get(alias)
    }

    /// Aliases in creation order. A join always comes after its left-hand side.
    pub fn aliases(&self) -> &[String] {
        &self.tables
    }

    /// Entries in creation order.
    pub fn entries(&self) -> impl Iterator<Item = &AliasEntry> {
        self.tables.iter().filter_map(|a| self.entries.get(a))
    }

    /// Current reference counts, for comparison after a filter is applied.
    pub fn refcounts(&self) -> HashMap<String, usize> {
        self.entries
            .iter()
            .map(|(alias, e)| (alias.clone(), e.refcount))
            .collect()
    }

    /// Aliases of `table`, in creation order.
    pub fn aliases_for_table(&self, table: &str) -> &[String] {
        self.table_map.get(table).map_or(&[], Vec::as_slice)
    }

    /// Returns an alias for `table`, creating one unless an existing alias
    /// may be reused. The returned alias has been referenced once more.
    pub fn table_alias(&mut self, table: &str, create: bool) -> (String, bool) {
        if !create {
            if let Some(existing) = self.aliases_for_table(table).first().cloned() {
                self.ref_alias(&existing);
                return (existing, false);
            }
        }
        let alias = if self.table_map.contains_key(table) {
            format!("{}{}", self.prefix, self.entries.len() + 1)
        } else {
            table.to_string()
        };
        self.table_map
            .entry(table.to_string())
            .or_default()
            .push(alias.clone());
        self.entries.insert(
            alias.clone(),
            AliasEntry {
                table: table.to_string(),
                alias: alias.clone(),
                join_type: None,
                lhs_alias: None,
                lhs_col: None,
                rhs_col: None,
                nullable: false,
                refcount: 1,
            },
        );
        self.tables.push(alias.clone());
        (alias, true)
    }

    /// Adds a reference to an alias.
    pub fn ref_alias(&mut self, alias: &str) {
        if let Some(e) = self.entries.get_mut(alias) {
            e.refcount += 1;
        }
    }

    /// Drops a reference to an alias.
    pub fn unref_alias(&mut self, alias: &str) {
        if let Some(e) = self.entries.get_mut(alias) {
            e.refcount = e.refcount.saturating_sub(1);
        }
    }

    /// Number of aliases still referenced.
    pub fn count_active_tables(&self) -> usize {
        self.entries.values().filter(|e| e.refcount > 0).count()
    }

    /// Joins `table` onto `lhs` with `lhs.lhs_col = table.rhs_col`, reusing a
    /// cached join when `opts` allows it. Returns the alias, referenced.
    pub fn join(
        &mut self,
        lhs: &str,
        table: &str,
        lhs_col: &str,
        rhs_col: &str,
        opts: JoinOptions<'_>,
    ) -> String {
        let key = JoinKey {
            lhs_alias: lhs.to_string(),
            table: table.to_string(),
            lhs_col: lhs_col.to_string(),
            rhs_col: rhs_col.to_string(),
        };
        let lhs_alive = self.entries.get(lhs).is_some_and(|e| e.refcount > 0);
        let reusable = match opts.reuse {
            Reuse::Never => None,
            Reuse::Always | Reuse::Only(_) | Reuse::Except(_) if !lhs_alive => None,
            Reuse::Always => self.join_cache.get(&key).and_then(|v| v.first()).cloned(),
            Reuse::Only(allowed) => self
                .join_cache
                .get(&key)
                .and_then(|v| v.iter().find(|a| allowed.contains(*a)))
                .cloned(),
            Reuse::Except(excluded) => self
                .join_cache
                .get(&key)
                .and_then(|v| v.iter().find(|a| !excluded.contains(*a)))
                .cloned(),
        };
        if let Some(alias) = reusable {
            self.ref_alias(&alias);
            if opts.promote {
                self.promote_alias(&alias, false);
            }
            tracing::trace!(alias = %alias, table, "reusing join");
            return alias;
        }

        let (alias, _) = self.table_alias(table, true);
        let join_type = if opts.promote || opts.outer_if_first {
            JoinType::LeftOuter
        } else {
            JoinType::Inner
        };
        if let Some(entry) = self.entries.get_mut(&alias) {
            entry.join_type = Some(join_type);
            entry.lhs_alias = Some(lhs.to_string());
            entry.lhs_col = Some(lhs_col.to_string());
            entry.rhs_col = Some(rhs_col.to_string());
            entry.nullable = opts.nullable;
        }
        self.join_cache.entry(key).or_default().push(alias.clone());
        tracing::trace!(alias = %alias, table, lhs, ?join_type, "created join");
        alias
    }

    /// Promotes a join to LEFT OUTER if it is nullable, or regardless when
    /// `unconditional` is set. Joins hanging off a promoted alias are
    /// promoted too, since an inner join after an outer one would drop the
    /// rows the outer join kept. Returns `true` if anything changed.
    pub fn promote_alias(&mut self, alias: &str, unconditional: bool) -> bool {
        let Some(entry) = self.entries.get_mut(alias) else {
            return false;
        };
        let promotable = entry.join_type == Some(JoinType::Inner) && (unconditional || entry.nullable);
        if !promotable {
            return false;
        }
        entry.join_type = Some(JoinType::LeftOuter);
        tracing::trace!(alias, "promoted join to LEFT OUTER");
        let children: Vec<String> = self
            .entries()
            .filter(|e| e.lhs_alias.as_deref() == Some(alias))
            .map(|e| e.alias.clone())
            .collect();
        for child in children {
            self.promote_alias(&child, true);
        }
        true
    }

    /// Walks a join chain promoting nullable joins; once one is promoted,
    /// every later join in the chain is promoted as well.
    pub fn promote_alias_chain(&mut self, chain: &[String], must_promote: bool) {
        let mut must = must_promote;
        for alias in chain {
            if self.promote_alias(alias, must) {
                must = true;
            }
        }
    }

    /// After one branch of an OR: promotes the nullable aliases it used that
    /// it either created or did not reference further.
    pub fn promote_unused_aliases(
        &mut self,
        initial_refcounts: &HashMap<String, usize>,
        used_aliases: &HashSet<String>,
    ) {
        let candidates: Vec<String> = self
            .tables
            .iter()
            .filter(|alias| used_aliases.contains(*alias))
            .filter(|alias| {
                initial_refcounts
                    .get(*alias)
                    .map_or(true, |before| self.entries.get(*alias).map(|e| e.refcount) == Some(*before))
            })
            .cloned()
            .collect();
        for alias in candidates {
            self.promote_alias(&alias, false);
        }
    }

    /// Renames aliases. Every old alias in `change_map` must exist; new names
    /// must not collide with aliases that are not being renamed.
    pub fn change_aliases(&mut self, change_map: &HashMap<String, String>) {
        let rename = |a: &str| change_map.get(a).cloned().unwrap_or_else(|| a.to_string());
        self.entries = self
            .entries
            .drain()
            .map(|(alias, mut entry)| {
                entry.alias = rename(&alias);
                entry.lhs_alias = entry.lhs_alias.as_deref().map(rename);
                (entry.alias.clone(), entry)
            })
            .collect();
        for alias in &mut self.tables {
            *alias = rename(alias);
        }
        for aliases in self.table_map.values_mut() {
            for alias in aliases.iter_mut() {
                *alias = rename(alias);
            }
        }
        self.rebuild_cache();
    }

    /// Renames every alias to `<prefix><position>` and uses `prefix` for
    /// aliases created afterwards. Returns the rename map.
    pub fn bump_prefix(&mut self, prefix: &str) -> HashMap<String, String> {
        self.prefix = prefix.to_string();
        let change_map: HashMap<String, String> = self
            .tables
            .iter()
            .enumerate()
            .map(|(pos, alias)| (alias.clone(), format!("{prefix}{pos}")))
            .collect();
        self.change_aliases(&change_map);
        change_map
    }

    fn rebuild_cache(&mut self) {
        let mut cache: HashMap<JoinKey, Vec<String>> = HashMap::new();
        for alias in &self.tables {
            if let Some(key) = self.entries.get(alias).and_then(AliasEntry::key) {
                cache.entry(key).or_default().push(alias.clone());
            }
        }
        self.join_cache = cache;
    }
}
