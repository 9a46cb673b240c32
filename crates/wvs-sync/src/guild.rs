//! Guilds: owned by Center, mirrored by every Game and Shop worker.
//!
//! [`GuildTable`] is the only writer. Each accepted mutation queues one
//! broadcast of the shape `opcode, guildId, fields, guild record` for all
//! Game and Shop workers and records a [`GuildChange`] for persistence.
//! Workers apply the broadcasts to a [`GuildMirror`] and never change a
//! guild on their own.

use std::collections::BTreeMap;
use std::sync::Mutex;

use wvs_protocol::{
    CharacterId, Guild, GuildId, GuildLogo, GuildMember, GuildRank, Packet, PacketReader,
    ServerMessage,
};
use wvs_world::Directory;

use crate::{Outbox, SyncError, Target};

/// What a worker sends about each founding member of a new guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Founder {
    pub id: CharacterId,
    pub name: String,
    pub job: i16,
    pub level: u8,
}

/// A write the guild store still has to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuildChange {
    Saved(Guild),
    Deleted(GuildId),
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Durable storage for guild records.
///
/// Calls block, so Center only ever makes them from a blocking worker
/// and feeds the outcome back into the scheduler.
pub trait GuildStore: Send + Sync + 'static {
    fn load_all(&self) -> Result<Vec<Guild>, SyncError>;
    fn save(&self, guild: &Guild) -> Result<(), SyncError>;
    fn delete(&self, id: GuildId) -> Result<(), SyncError>;
}

/// Keeps guilds in process memory. Used when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryGuildStore {
    guilds: Mutex<BTreeMap<GuildId, Guild>>,
}

impl MemoryGuildStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guilds(guilds: impl IntoIterator<Item = Guild>) -> Self {
        Self {
            guilds: Mutex::new(guilds.into_iter().map(|g| (g.id, g)).collect()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<GuildId, Guild>>, SyncError> {
        self.guilds
            .lock()
            .map_err(|_| SyncError::Persistence("guild store lock poisoned".into()))
    }
}

impl GuildStore for MemoryGuildStore {
    fn load_all(&self) -> Result<Vec<Guild>, SyncError> {
        Ok(self.lock()?.values().cloned().collect())
    }

    fn save(&self, guild: &Guild) -> Result<(), SyncError> {
        self.lock()?.insert(guild.id, guild.clone());
        Ok(())
    }

    fn delete(&self, id: GuildId) -> Result<(), SyncError> {
        self.lock()?.remove(&id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GuildTable
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct GuildTable {
    guilds: BTreeMap<GuildId, Guild>,
    next_id: i32,
    default_capacity: u8,
    changes: Vec<GuildChange>,
}

impl GuildTable {
    pub fn new(default_capacity: u8) -> Self {
        Self {
            guilds: BTreeMap::new(),
            next_id: 1,
            default_capacity,
            changes: Vec::new(),
        }
    }

    /// Replaces the table with guilds read from storage.
    pub fn load(&mut self, guilds: impl IntoIterator<Item = Guild>) {
        self.guilds = guilds.into_iter().map(|g| (g.id, g)).collect();
        self.next_id = self.guilds.keys().map(|id| id.0 + 1).max().unwrap_or(1);
        tracing::info!(count = self.guilds.len(), "guilds loaded");
    }

    pub fn get(&self, id: GuildId) -> Option<&Guild> {
        self.guilds.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Guild> {
        self.guilds.values()
    }

    pub fn len(&self) -> usize {
        self.guilds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guilds.is_empty()
    }

    pub fn default_capacity(&self) -> u8 {
        self.default_capacity
    }

    /// The guild `character` belongs to.
    pub fn guild_of(&self, character: CharacterId) -> Option<GuildId> {
        self.guilds
            .values()
            .find(|g| g.member(character).is_some())
            .map(|g| g.id)
    }

    /// Drains the writes queued since the last call.
    pub fn take_changes(&mut self) -> Vec<GuildChange> {
        std::mem::take(&mut self.changes)
    }

    /// `GuildUpdate` with every guild, online flags taken from `dir`.
    pub fn snapshot(&mut self, dir: &Directory) -> Packet {
        let mut p = Packet::new(ServerMessage::GuildUpdate);
        p.write_i32(self.guilds.len() as i32);
        for guild in self.guilds.values_mut() {
            for member in &mut guild.members {
                member.online = dir.contains(member.id);
            }
            guild.encode(&mut p);
        }
        p
    }

    /// Rebroadcasts the whole table, e.g. after an operator edited guilds
    /// directly in storage.
    pub fn reload(&mut self, dir: &Directory, out: &mut Outbox) {
        let packet = self.snapshot(dir);
        out.push(Target::GameAndShop, packet);
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Founds a guild and then joins every founder, `master` at rank
    /// Master and everyone else as Member.
    pub fn create(
        &mut self,
        dir: &Directory,
        out: &mut Outbox,
        master: CharacterId,
        name: &str,
        founders: Vec<Founder>,
    ) -> Result<GuildId, SyncError> {
        if self.name_taken(name, None) {
            return Err(SyncError::GuildNameTaken(name.to_owned()));
        }
        if self.guild_of(master).is_some() {
            return Err(SyncError::AlreadyInGuild(master));
        }

        let id = GuildId(self.next_id);
        self.next_id += 1;
        let guild = Guild {
            id,
            name: name.to_owned(),
            logo: GuildLogo::default(),
            capacity: self.default_capacity,
            members: Vec::new(),
        };
        tracing::info!(guild = %id, %master, name, "guild created");

        let mut p = Packet::new(ServerMessage::GuildUpdateSingle);
        guild.encode(&mut p);
        out.push(Target::GameAndShop, p);
        self.guilds.insert(id, guild);
        self.saved(id);

        for founder in founders {
            let rank = if founder.id == master {
                GuildRank::Master
            } else {
                GuildRank::Member
            };
            let member = GuildMember {
                id: founder.id,
                name: founder.name,
                job: founder.job,
                level: founder.level,
                online: dir.contains(founder.id),
                rank,
            };
            if let Err(e) = self.insert_member(out, id, member) {
                tracing::warn!(guild = %id, error = %e, "founder could not join");
            }
        }
        Ok(id)
    }

    /// Removes a guild everywhere.
    pub fn disband(
        &mut self,
        out: &mut Outbox,
        id: GuildId,
        by: CharacterId,
    ) -> Result<(), SyncError> {
        self.guilds.remove(&id).ok_or(SyncError::GuildNotFound(id))?;
        tracing::info!(guild = %id, %by, "guild disbanded");

        let mut p = Packet::new(ServerMessage::GuildDisbanded);
        p.write_i32(id.0);
        out.push(Target::GameAndShop, p);
        self.changes.push(GuildChange::Deleted(id));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Adds an invitee who accepted. The worker that held the invite
    /// only forwards accepted ones; capacity is checked again here since
    /// two invites can be accepted at once.
    pub fn join(
        &mut self,
        dir: &Directory,
        out: &mut Outbox,
        id: GuildId,
        mut member: GuildMember,
    ) -> Result<(), SyncError> {
        if !dir.contains(member.id) {
            return Err(SyncError::CharacterOffline(member.id));
        }
        member.rank = GuildRank::Member;
        member.online = true;
        self.insert_member(out, id, member)
    }

    fn insert_member(
        &mut self,
        out: &mut Outbox,
        id: GuildId,
        member: GuildMember,
    ) -> Result<(), SyncError> {
        if self.guild_of(member.id).is_some() {
            return Err(SyncError::AlreadyInGuild(member.id));
        }
        let guild = self.guilds.get_mut(&id).ok_or(SyncError::GuildNotFound(id))?;
        if guild.is_full() {
            return Err(SyncError::GuildFull(id));
        }
        tracing::info!(guild = %id, character = %member.id, name = %member.name, "joined guild");

        let mut p = Packet::new(ServerMessage::GuildJoinPlayer);
        p.write_i32(id.0);
        member.encode(&mut p);
        guild.members.push(member);
        guild.encode(&mut p);
        out.push(Target::GameAndShop, p);
        self.saved(id);
        Ok(())
    }

    /// `character` leaves on their own. An emptied guild is kept.
    pub fn leave(&mut self, out: &mut Outbox, character: CharacterId) -> Result<(), SyncError> {
        let id = self
            .guild_of(character)
            .ok_or(SyncError::NotInGuild(character))?;
        self.remove_member(out, id, character, false)
    }

    /// `kicker` removes `target`. Only a strictly lower rank may be
    /// kicked; anything else is refused without a broadcast.
    pub fn kick(
        &mut self,
        out: &mut Outbox,
        kicker: CharacterId,
        target: CharacterId,
    ) -> Result<(), SyncError> {
        let id = self
            .guild_of(target)
            .ok_or(SyncError::NotInGuild(target))?;
        let guild = self.guilds.get(&id).ok_or(SyncError::GuildNotFound(id))?;
        let kicker_rank = guild
            .member(kicker)
            .map(|m| m.rank)
            .ok_or(SyncError::NotInGuild(kicker))?;
        let target_rank = guild
            .member(target)
            .map(|m| m.rank)
            .ok_or(SyncError::NotInGuild(target))?;
        if kicker_rank <= target_rank {
            return Err(SyncError::RankTooLow {
                actor: kicker,
                target,
            });
        }
        tracing::info!(guild = %id, %kicker, %target, "kicked from guild");
        self.remove_member(out, id, target, true)
    }

    fn remove_member(
        &mut self,
        out: &mut Outbox,
        id: GuildId,
        character: CharacterId,
        kicked: bool,
    ) -> Result<(), SyncError> {
        let guild = self.guilds.get_mut(&id).ok_or(SyncError::GuildNotFound(id))?;
        guild.members.retain(|m| m.id != character);
        tracing::info!(guild = %id, %character, kicked, "left guild");

        let mut p = Packet::new(ServerMessage::GuildLeavePlayer);
        p.write_i32(id.0).write_i32(character.0).write_bool(kicked);
        guild.encode(&mut p);
        out.push(Target::GameAndShop, p);
        self.saved(id);
        Ok(())
    }

    /// Sets `member`'s rank to `rank` on behalf of `updater`.
    ///
    /// The updater must outrank the member. Handing over Master is only
    /// allowed to the current Master, who becomes JrMaster, so a guild
    /// always has exactly one Master.
    pub fn update_rank(
        &mut self,
        out: &mut Outbox,
        updater: CharacterId,
        id: GuildId,
        member: CharacterId,
        rank: GuildRank,
    ) -> Result<(), SyncError> {
        let guild = self.guilds.get_mut(&id).ok_or(SyncError::GuildNotFound(id))?;
        let updater_rank = guild
            .member(updater)
            .map(|m| m.rank)
            .ok_or(SyncError::NotInGuild(updater))?;
        let current = guild
            .member(member)
            .map(|m| m.rank)
            .ok_or(SyncError::NotInGuild(member))?;

        let handover = rank == GuildRank::Master;
        let allowed = if handover {
            updater_rank == GuildRank::Master && updater != member
        } else {
            updater_rank > current && updater_rank > rank
        };
        if !allowed {
            return Err(SyncError::RankTooLow {
                actor: updater,
                target: member,
            });
        }

        if handover {
            if let Some(old) = guild.member_mut(updater) {
                old.rank = GuildRank::JrMaster;
            }
        }
        if let Some(m) = guild.member_mut(member) {
            m.rank = rank;
        }
        tracing::info!(guild = %id, %updater, %member, rank = ?rank, "guild rank changed");

        if handover {
            self.broadcast_member(out, id, updater);
        }
        self.broadcast_member(out, id, member);
        self.saved(id);
        Ok(())
    }

    /// Refreshes the job, level and online flag a worker reports for an
    /// existing member. Rank and name stay as Center has them.
    pub fn update_member(
        &mut self,
        out: &mut Outbox,
        id: GuildId,
        update: &GuildMember,
    ) -> Result<(), SyncError> {
        let guild = self.guilds.get_mut(&id).ok_or(SyncError::GuildNotFound(id))?;
        let member = guild
            .member_mut(update.id)
            .ok_or(SyncError::NotInGuild(update.id))?;
        member.job = update.job;
        member.level = update.level;
        member.online = update.online;
        self.broadcast_member(out, id, update.id);
        self.saved(id);
        Ok(())
    }

    /// Flips a member's online flag on login or logout. Characters
    /// without a guild are ignored.
    pub fn set_online(&mut self, out: &mut Outbox, character: CharacterId, online: bool) {
        let Some(id) = self.guild_of(character) else {
            return;
        };
        if let Some(member) = self
            .guilds
            .get_mut(&id)
            .and_then(|g| g.member_mut(character))
        {
            if member.online == online {
                return;
            }
            member.online = online;
        }
        self.broadcast_member(out, id, character);
    }

    /// Keeps job and level current after a job advance or level up.
    pub fn update_job_level(&mut self, out: &mut Outbox, character: CharacterId, job: i16, level: u8) {
        let Some(id) = self.guild_of(character) else {
            return;
        };
        if let Some(member) = self
            .guilds
            .get_mut(&id)
            .and_then(|g| g.member_mut(character))
        {
            member.job = job;
            member.level = level;
        }
        self.broadcast_member(out, id, character);
        self.saved(id);
    }

    fn broadcast_member(&self, out: &mut Outbox, id: GuildId, character: CharacterId) {
        let Some(guild) = self.guilds.get(&id) else {
            return;
        };
        let Some(member) = guild.member(character) else {
            return;
        };
        let mut p = Packet::new(ServerMessage::GuildUpdatePlayer);
        p.write_i32(id.0);
        member.encode(&mut p);
        guild.encode(&mut p);
        out.push(Target::GameAndShop, p);
    }

    // -----------------------------------------------------------------------
    // Single-field changes
    // -----------------------------------------------------------------------

    pub fn resize(
        &mut self,
        out: &mut Outbox,
        id: GuildId,
        by: CharacterId,
        capacity: u8,
    ) -> Result<(), SyncError> {
        let guild = self.guilds.get_mut(&id).ok_or(SyncError::GuildNotFound(id))?;
        if usize::from(capacity) < guild.members.len() {
            return Err(SyncError::InvalidCapacity {
                guild: id,
                requested: capacity,
                members: guild.members.len(),
            });
        }
        guild.capacity = capacity;
        tracing::info!(guild = %id, %by, capacity, "guild resized");

        let mut p = Packet::new(ServerMessage::GuildResized);
        p.write_i32(id.0).write_u8(capacity);
        guild.encode(&mut p);
        out.push(Target::GameAndShop, p);
        self.saved(id);
        Ok(())
    }

    pub fn rename(
        &mut self,
        out: &mut Outbox,
        id: GuildId,
        by: CharacterId,
        name: &str,
    ) -> Result<(), SyncError> {
        if self.name_taken(name, Some(id)) {
            return Err(SyncError::GuildNameTaken(name.to_owned()));
        }
        let guild = self.guilds.get_mut(&id).ok_or(SyncError::GuildNotFound(id))?;
        guild.name = name.to_owned();
        tracing::info!(guild = %id, %by, name, "guild renamed");

        let mut p = Packet::new(ServerMessage::GuildRename);
        p.write_i32(id.0).write_string(name);
        guild.encode(&mut p);
        out.push(Target::GameAndShop, p);
        self.saved(id);
        Ok(())
    }

    pub fn change_logo(
        &mut self,
        out: &mut Outbox,
        id: GuildId,
        by: CharacterId,
        logo: GuildLogo,
    ) -> Result<(), SyncError> {
        let guild = self.guilds.get_mut(&id).ok_or(SyncError::GuildNotFound(id))?;
        guild.logo = logo;
        tracing::info!(guild = %id, %by, ?logo, "guild logo changed");

        let mut p = Packet::new(ServerMessage::GuildChangeLogo);
        p.write_i32(id.0);
        logo.encode(&mut p);
        guild.encode(&mut p);
        out.push(Target::GameAndShop, p);
        self.saved(id);
        Ok(())
    }

    /// Relays a guild chat line to every game server, which deliver it
    /// to the members they host.
    pub fn chat(
        &self,
        out: &mut Outbox,
        id: GuildId,
        chatter: CharacterId,
        text: &str,
    ) -> Result<(), SyncError> {
        if !self.guilds.contains_key(&id) {
            return Err(SyncError::GuildNotFound(id));
        }
        tracing::debug!(guild = %id, %chatter, text, "guild chat");
        let mut p = Packet::new(ServerMessage::GuildChat);
        p.write_i32(id.0).write_i32(chatter.0).write_string(text);
        out.push(Target::GameServers, p);
        Ok(())
    }

    fn name_taken(&self, name: &str, except: Option<GuildId>) -> bool {
        self.guilds
            .values()
            .any(|g| Some(g.id) != except && g.name.eq_ignore_ascii_case(name))
    }

    fn saved(&mut self, id: GuildId) {
        if let Some(guild) = self.guilds.get(&id) {
            self.changes.push(GuildChange::Saved(guild.clone()));
        }
    }
}

// ---------------------------------------------------------------------------
// GuildMirror
// ---------------------------------------------------------------------------

/// A worker's read-only copy of the guild table, kept current by
/// applying Center's guild broadcasts in order.
#[derive(Debug, Default)]
pub struct GuildMirror {
    guilds: BTreeMap<GuildId, Guild>,
}

impl GuildMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: GuildId) -> Option<&Guild> {
        self.guilds.get(&id)
    }

    pub fn len(&self) -> usize {
        self.guilds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guilds.is_empty()
    }

    /// Whether `op` is a message this mirror consumes.
    pub fn handles(op: ServerMessage) -> bool {
        matches!(
            op,
            ServerMessage::GuildUpdate
                | ServerMessage::GuildUpdateSingle
                | ServerMessage::GuildJoinPlayer
                | ServerMessage::GuildLeavePlayer
                | ServerMessage::GuildUpdatePlayer
                | ServerMessage::GuildDisbanded
                | ServerMessage::GuildResized
                | ServerMessage::GuildRename
                | ServerMessage::GuildChangeLogo
        )
    }

    /// Applies one guild broadcast, opcode included.
    pub fn apply(&mut self, bytes: &[u8]) -> Result<(), SyncError> {
        let mut r = PacketReader::new(bytes);
        let op: ServerMessage = r.read_opcode()?;
        match op {
            ServerMessage::GuildUpdate => {
                let count = r.read_i32()?;
                self.guilds.clear();
                for _ in 0..count {
                    let guild = Guild::decode(&mut r)?;
                    self.guilds.insert(guild.id, guild);
                }
            }
            ServerMessage::GuildUpdateSingle => {
                let guild = Guild::decode(&mut r)?;
                self.guilds.insert(guild.id, guild);
            }
            ServerMessage::GuildDisbanded => {
                let id = GuildId(r.read_i32()?);
                if self.guilds.remove(&id).is_none() {
                    tracing::warn!(guild = %id, "disband for unknown guild");
                }
            }
            ServerMessage::GuildJoinPlayer
            | ServerMessage::GuildUpdatePlayer
            | ServerMessage::GuildLeavePlayer
            | ServerMessage::GuildResized
            | ServerMessage::GuildRename
            | ServerMessage::GuildChangeLogo => {
                let id = GuildId(r.read_i32()?);
                skip_fields(op, &mut r)?;
                let guild = Guild::decode(&mut r)?;
                if !self.guilds.contains_key(&id) {
                    tracing::warn!(guild = %id, %op, "update for unknown guild");
                }
                self.guilds.insert(id, guild);
            }
            other => return Err(SyncError::UnexpectedMessage(other as u8)),
        }
        Ok(())
    }
}

/// Reads past the operation-specific fields between the guild ID and
/// the full record.
fn skip_fields(op: ServerMessage, r: &mut PacketReader<'_>) -> Result<(), SyncError> {
    match op {
        ServerMessage::GuildJoinPlayer | ServerMessage::GuildUpdatePlayer => {
            GuildMember::decode(r)?;
        }
        ServerMessage::GuildLeavePlayer => {
            r.read_i32()?;
            r.read_bool()?;
        }
        ServerMessage::GuildResized => {
            r.read_u8()?;
        }
        ServerMessage::GuildRename => {
            r.read_string()?;
        }
        ServerMessage::GuildChangeLogo => {
            GuildLogo::decode(r)?;
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use wvs_protocol::ServerRole;
    use wvs_world::Registration;

    use super::*;

    fn online(dir: &mut Directory, id: i32) -> CharacterId {
        dir.register(
            Registration {
                id: CharacterId(id),
                name: format!("char{id}"),
                job: 100,
                level: 30,
                gm_level: 0,
            },
            ServerRole::Game,
            1,
        );
        CharacterId(id)
    }

    fn founder(id: i32) -> Founder {
        Founder {
            id: CharacterId(id),
            name: format!("char{id}"),
            job: 100,
            level: 30,
        }
    }

    fn member(id: i32) -> GuildMember {
        GuildMember {
            id: CharacterId(id),
            name: format!("char{id}"),
            job: 100,
            level: 30,
            online: true,
            rank: GuildRank::Master,
        }
    }

    /// Guild 1 with master 1 and members 2, 3.
    fn setup() -> (GuildTable, Directory, Outbox, GuildId) {
        let mut dir = Directory::new();
        let mut table = GuildTable::new(10);
        let mut out = Outbox::new();
        for id in 1..=3 {
            online(&mut dir, id);
        }
        let id = table
            .create(&dir, &mut out, CharacterId(1), "Heroes", vec![founder(1), founder(2), founder(3)])
            .unwrap();
        out.take();
        table.take_changes();
        (table, dir, out, id)
    }

    fn rank_of(table: &GuildTable, id: GuildId, c: i32) -> GuildRank {
        table.get(id).unwrap().member(CharacterId(c)).unwrap().rank
    }

    // =========================================================================
    // create / join
    // =========================================================================

    #[test]
    fn test_create_sends_empty_guild_then_joins() {
        let mut dir = Directory::new();
        let mut table = GuildTable::new(10);
        let mut out = Outbox::new();
        online(&mut dir, 1);
        online(&mut dir, 2);

        let id = table
            .create(&dir, &mut out, CharacterId(1), "Heroes", vec![founder(1), founder(2)])
            .unwrap();

        let sent = out.take();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].1.opcode(), Some(ServerMessage::GuildUpdateSingle as u8));
        let mut r = PacketReader::new(&sent[0].1.as_bytes()[1..]);
        assert!(Guild::decode(&mut r).unwrap().members.is_empty());
        assert!(sent[1..]
            .iter()
            .all(|(t, p)| *t == Target::GameAndShop
                && p.opcode() == Some(ServerMessage::GuildJoinPlayer as u8)));

        let guild = table.get(id).unwrap();
        assert_eq!(guild.capacity, 10);
        assert_eq!(guild.master().unwrap().id, CharacterId(1));
        assert_eq!(rank_of(&table, id, 2), GuildRank::Member);
    }

    #[test]
    fn test_create_duplicate_name_is_rejected() {
        let (mut table, dir, mut out, _) = setup();
        let result = table.create(&dir, &mut out, CharacterId(9), "heroes", vec![]);
        assert_eq!(result, Err(SyncError::GuildNameTaken("heroes".into())));
    }

    #[test]
    fn test_join_forces_member_rank() {
        let (mut table, mut dir, mut out, id) = setup();
        online(&mut dir, 4);

        table.join(&dir, &mut out, id, member(4)).unwrap();

        assert_eq!(rank_of(&table, id, 4), GuildRank::Member);
        assert_eq!(table.get(id).unwrap().members.len(), 4);
    }

    #[test]
    fn test_join_already_in_guild_is_rejected() {
        let (mut table, dir, mut out, id) = setup();
        let result = table.join(&dir, &mut out, id, member(2));
        assert_eq!(result, Err(SyncError::AlreadyInGuild(CharacterId(2))));
        assert!(out.is_empty());
    }

    #[test]
    fn test_join_full_guild_is_rejected() {
        let (mut table, mut dir, mut out, id) = setup();
        table.resize(&mut out, id, CharacterId(1), 3).unwrap();
        out.take();
        online(&mut dir, 4);

        let result = table.join(&dir, &mut out, id, member(4));

        assert_eq!(result, Err(SyncError::GuildFull(id)));
        assert!(out.is_empty());
        let guild = table.get(id).unwrap();
        assert!(guild.members.len() <= usize::from(guild.capacity));
    }

    #[test]
    fn test_join_offline_character_is_rejected() {
        let (mut table, dir, mut out, id) = setup();
        let result = table.join(&dir, &mut out, id, member(8));
        assert_eq!(result, Err(SyncError::CharacterOffline(CharacterId(8))));
    }

    // =========================================================================
    // leave / kick
    // =========================================================================

    #[test]
    fn test_kick_requires_strictly_higher_rank() {
        let (mut table, _dir, mut out, id) = setup();

        let result = table.kick(&mut out, CharacterId(2), CharacterId(3));
        assert!(matches!(result, Err(SyncError::RankTooLow { .. })));
        assert!(out.is_empty());

        table.kick(&mut out, CharacterId(1), CharacterId(3)).unwrap();
        assert!(table.get(id).unwrap().member(CharacterId(3)).is_none());

        let sent = out.take();
        let mut r = PacketReader::new(sent[0].1.as_bytes());
        assert_eq!(r.read_u8().unwrap(), ServerMessage::GuildLeavePlayer as u8);
        assert_eq!(r.read_i32().unwrap(), id.0);
        assert_eq!(r.read_i32().unwrap(), 3);
        assert!(r.read_bool().unwrap());
    }

    #[test]
    fn test_kick_master_is_refused() {
        let (mut table, _dir, mut out, _) = setup();
        let result = table.kick(&mut out, CharacterId(1), CharacterId(1));
        assert!(matches!(result, Err(SyncError::RankTooLow { .. })));
    }

    #[test]
    fn test_leave_not_in_guild_is_error() {
        let (mut table, _dir, mut out, _) = setup();
        assert_eq!(
            table.leave(&mut out, CharacterId(7)),
            Err(SyncError::NotInGuild(CharacterId(7)))
        );
    }

    // =========================================================================
    // rank / member updates
    // =========================================================================

    #[test]
    fn test_update_rank_master_handover_keeps_single_master() {
        let (mut table, _dir, mut out, id) = setup();

        table
            .update_rank(&mut out, CharacterId(1), id, CharacterId(2), GuildRank::Master)
            .unwrap();

        assert_eq!(rank_of(&table, id, 1), GuildRank::JrMaster);
        assert_eq!(rank_of(&table, id, 2), GuildRank::Master);
        let masters = table
            .get(id)
            .unwrap()
            .members
            .iter()
            .filter(|m| m.rank == GuildRank::Master)
            .count();
        assert_eq!(masters, 1);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_update_rank_jr_master_cannot_promote_to_own_rank() {
        let (mut table, _dir, mut out, id) = setup();
        table
            .update_rank(&mut out, CharacterId(1), id, CharacterId(2), GuildRank::JrMaster)
            .unwrap();

        let result =
            table.update_rank(&mut out, CharacterId(2), id, CharacterId(3), GuildRank::JrMaster);

        assert!(matches!(result, Err(SyncError::RankTooLow { .. })));
        assert_eq!(rank_of(&table, id, 3), GuildRank::Member);
    }

    #[test]
    fn test_set_online_broadcasts_only_on_change() {
        let (mut table, _dir, mut out, id) = setup();

        table.set_online(&mut out, CharacterId(2), false);
        table.set_online(&mut out, CharacterId(2), false);
        table.set_online(&mut out, CharacterId(99), false);

        assert_eq!(out.len(), 1);
        assert!(!table.get(id).unwrap().member(CharacterId(2)).unwrap().online);
    }

    // =========================================================================
    // single-field changes / persistence
    // =========================================================================

    #[test]
    fn test_resize_below_member_count_is_rejected() {
        let (mut table, _dir, mut out, id) = setup();
        let result = table.resize(&mut out, id, CharacterId(1), 2);
        assert_eq!(
            result,
            Err(SyncError::InvalidCapacity {
                guild: id,
                requested: 2,
                members: 3
            })
        );
        assert_eq!(table.get(id).unwrap().capacity, 10);
    }

    #[test]
    fn test_disband_removes_and_records_deletion() {
        let (mut table, _dir, mut out, id) = setup();

        table.disband(&mut out, id, CharacterId(1)).unwrap();

        assert!(table.get(id).is_none());
        assert_eq!(table.take_changes(), vec![GuildChange::Deleted(id)]);
        assert_eq!(
            table.disband(&mut out, id, CharacterId(1)),
            Err(SyncError::GuildNotFound(id))
        );
    }

    #[test]
    fn test_mutations_record_saved_changes() {
        let (mut table, _dir, mut out, id) = setup();

        table.rename(&mut out, id, CharacterId(1), "Villains").unwrap();

        let changes = table.take_changes();
        assert_eq!(changes.len(), 1);
        assert!(matches!(&changes[0], GuildChange::Saved(g) if g.name == "Villains"));
    }

    #[test]
    fn test_load_continues_id_sequence() {
        let mut table = GuildTable::new(10);
        table.load([Guild {
            id: GuildId(41),
            name: "Old".into(),
            logo: GuildLogo::default(),
            capacity: 10,
            members: vec![],
        }]);
        let dir = Directory::new();
        let mut out = Outbox::new();

        let id = table.create(&dir, &mut out, CharacterId(1), "New", vec![]).unwrap();

        assert_eq!(id, GuildId(42));
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryGuildStore::new();
        let (table, _dir, _out, id) = setup();
        store.save(table.get(id).unwrap()).unwrap();
        assert_eq!(store.load_all().unwrap().len(), 1);
        store.delete(id).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }

    // =========================================================================
    // mirror
    // =========================================================================

    #[test]
    fn test_mirror_follows_every_broadcast() {
        let mut dir = Directory::new();
        let mut table = GuildTable::new(10);
        let mut out = Outbox::new();
        let mut mirror = GuildMirror::new();
        for id in 1..=4 {
            online(&mut dir, id);
        }

        let id = table
            .create(&dir, &mut out, CharacterId(1), "Heroes", vec![founder(1), founder(2)])
            .unwrap();
        table.join(&dir, &mut out, id, member(3)).unwrap();
        table.kick(&mut out, CharacterId(1), CharacterId(2)).unwrap();
        table.resize(&mut out, id, CharacterId(1), 20).unwrap();
        table.rename(&mut out, id, CharacterId(1), "Legends").unwrap();
        let logo = GuildLogo {
            background: 1000,
            background_color: 2,
            foreground: 2000,
            foreground_color: 3,
        };
        table.change_logo(&mut out, id, CharacterId(1), logo).unwrap();
        table.update_job_level(&mut out, CharacterId(3), 110, 35);

        for (_, packet) in out.take() {
            mirror.apply(packet.as_bytes()).unwrap();
        }
        assert_eq!(mirror.get(id), table.get(id));

        table.disband(&mut out, id, CharacterId(1)).unwrap();
        for (_, packet) in out.take() {
            mirror.apply(packet.as_bytes()).unwrap();
        }
        assert!(mirror.is_empty());
    }

    #[test]
    fn test_mirror_snapshot_replaces_everything() {
        let (mut table, dir, _out, id) = setup();
        let mut mirror = GuildMirror::new();
        let mut stale = Packet::new(ServerMessage::GuildUpdateSingle);
        Guild {
            id: GuildId(77),
            name: "Stale".into(),
            logo: GuildLogo::default(),
            capacity: 5,
            members: vec![],
        }
        .encode(&mut stale);
        mirror.apply(stale.as_bytes()).unwrap();

        mirror.apply(table.snapshot(&dir).as_bytes()).unwrap();

        assert_eq!(mirror.len(), 1);
        assert!(mirror.get(id).is_some());
    }

    #[test]
    fn test_mirror_rejects_other_messages() {
        let mut mirror = GuildMirror::new();
        let p = Packet::new(ServerMessage::ChangeRates);
        assert_eq!(
            mirror.apply(p.as_bytes()),
            Err(SyncError::UnexpectedMessage(ServerMessage::ChangeRates as u8))
        );
        assert!(!GuildMirror::handles(ServerMessage::ChangeRates));
        assert!(GuildMirror::handles(ServerMessage::GuildRename));
    }
}
