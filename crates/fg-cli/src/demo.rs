//! The demo feed: a single `List` of `User`s that grows by one user per tick.

use std::sync::Arc;

use anyhow::{bail, Context as _};
use fg_crypto::SigningKey;
use fg_object::{object_hash, Context, Object, ObjectError, ObjectResult, Refs, Registry};
use fg_pack::{Container, PackFlags};
use fg_root::Root;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub age: u32,
}

impl Object for User {
    const SCHEMA: &'static str = "test.User";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct List {
    pub users: Refs<User>,
}

impl Object for List {
    const SCHEMA: &'static str = "test.List";

    fn save_refs(&mut self, ctx: &Context) -> ObjectResult<()> {
        self.users.save(ctx)?;
        Ok(())
    }
}

pub fn registry() -> anyhow::Result<Arc<Registry>> {
    Ok(Registry::builder()
        .register::<User>()?
        .register::<List>()?
        .build())
}

/// Writes the demo feed through a container.
pub struct Writer<'a> {
    container: &'a Container,
    key: SigningKey,
    flags: PackFlags,
}

impl<'a> Writer<'a> {
    pub fn new(container: &'a Container, key: SigningKey) -> Self {
        Self {
            container,
            key,
            flags: PackFlags {
                hash_table_index: true,
                ..PackFlags::default()
            },
        }
    }

    /// Save the empty list as the first root, unless the feed already has one.
    pub fn init(&self) -> anyhow::Result<Option<Root>> {
        let mut pack = self.container.new_pack(&self.key.feed(), &self.key, self.flags)?;
        if !pack.is_empty() {
            pack.close();
            return Ok(None);
        }
        pack.append(List::default())?;
        let root = pack.save()?;
        pack.close();
        info!(feed = %root.feed, seq = root.seq, "feed initialised");
        Ok(Some(root))
    }

    /// One step of the loop: append `User {n}`, find it by hash, rename it,
    /// confirm the old hash no longer resolves, then save.
    pub fn tick(&self, n: u64) -> anyhow::Result<Root> {
        let mut pack = self.container.new_pack(&self.key.feed(), &self.key, self.flags)?;
        {
            let (list, ctx) = pack.edit::<List>(0)?;
            let user = User {
                name: format!("User {n}"),
                age: u32::try_from(n).with_context(|| format!("tick {n} does not fit a user age"))?,
            };
            let old = object_hash(&user)?;
            list.users.append(ctx, user.clone())?;

            let mut found = list
                .users
                .ref_by_hash(ctx, &old)
                .with_context(|| format!("user {n} not found after append"))?;
            found.set_value(
                ctx,
                User {
                    name: format!("{} (Modified)", user.name),
                    ..user
                },
            )?;

            match list.users.ref_by_hash(ctx, &old) {
                Err(ObjectError::NotFound(_)) => {}
                Ok(r) => bail!("stale hash {} still resolves to index {}", old.short_hex(), r.index()),
                Err(e) => return Err(e.into()),
            }
        }
        let root = pack.save()?;
        debug!("{}", self.container.inspect(&root)?);
        pack.close();
        Ok(root)
    }
}
