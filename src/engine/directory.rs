use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};
use ulid::Ulid;

use crate::auth::{Identity, check_password};
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Partial room edit; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomUpdate {
    pub display_name: Option<String>,
    pub location: Option<String>,
    pub capacity: Option<u32>,
    pub facilities: Option<Vec<String>>,
    pub status: Option<RoomStatus>,
}

/// Partial account edit, applied as one directory event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub role: Option<Role>,
    pub suspended: Option<bool>,
    pub locked: Option<bool>,
    /// New cleartext password; hashed before it is stored.
    pub password: Option<String>,
}

impl UserUpdate {
    fn needs_admin(&self) -> bool {
        self.role.is_some() || self.suspended.is_some() || self.locked.is_some()
    }
}

fn check_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation(what));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn new_credential(password: &str) -> Result<Credential, EngineError> {
    check_password(password)?;
    Ok(Credential::from_password(password))
}

impl Engine {
    // ── Users ────────────────────────────────────────────────

    /// Resolve a login name to the identity core operations run as.
    /// Deleted and locked accounts resolve to nothing.
    pub fn identify(&self, username: &str) -> Option<Identity> {
        let user = self.user_by_name(username)?;
        (!user.deleted && !user.locked).then(|| Identity::from_user(&user))
    }

    /// Account registered under `username`, in any status.
    pub fn user_by_name(&self, username: &str) -> Option<User> {
        let id = *self.usernames.get(username)?.value();
        self.get_user(&id)
    }

    /// Create an account. Anyone may register a member; only an admin may
    /// create another admin.
    pub async fn register_user(
        &self,
        caller: Option<&Identity>,
        id: Ulid,
        username: String,
        email: Option<String>,
        role: Role,
        password: &str,
    ) -> Result<User, EngineError> {
        if role == Role::Admin && !caller.is_some_and(Identity::is_admin) {
            return Err(EngineError::Permission("only an admin can create admins"));
        }
        let credential = new_credential(password)?;
        self.insert_user(id, username, email, role, credential).await
    }

    /// Ensure the configured admin account exists and can log in; used at
    /// startup. A deleted, locked or demoted account of that name is
    /// restored. `password` is required only when the account must be
    /// created, and resets the stored one when it differs.
    pub async fn bootstrap_admin(&self, username: &str, password: Option<&str>) -> Result<Identity, EngineError> {
        let Some(mut user) = self.user_by_name(username) else {
            let password = password.ok_or(EngineError::Validation(
                "a password is required to create the admin account",
            ))?;
            let credential = new_credential(password)?;
            let user = self
                .insert_user(Ulid::new(), username.to_string(), None, Role::Admin, credential)
                .await?;
            info!("bootstrapped admin account {username}");
            return Ok(Identity::from_user(&user));
        };

        let restore = !user.is_active_admin();
        let reset = password.filter(|p| !user.credential.verify(p));
        if !restore && reset.is_none() {
            return Ok(Identity::from_user(&user));
        }
        if let Some(password) = reset {
            user.credential = new_credential(password)?;
        }
        user.role = Role::Admin;
        user.deleted = false;
        user.locked = false;

        let _gate = self.gate().await;
        let _dir = self.directory_lock.lock().await;
        let user = self.persist_user(user, false).await?;
        if restore {
            warn!("restored admin access for account {username}");
        }
        Ok(Identity::from_user(&user))
    }

    async fn insert_user(
        &self,
        id: Ulid,
        username: String,
        email: Option<String>,
        role: Role,
        credential: Credential,
    ) -> Result<User, EngineError> {
        check_name(&username, "username must not be empty")?;
        let _gate = self.gate().await;
        let _dir = self.directory_lock.lock().await;
        if self.users.len() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if self.users.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Some(existing) = self.usernames.get(&username) {
            return Err(EngineError::AlreadyExists(*existing.value()));
        }
        let user = User {
            id,
            username,
            email,
            role,
            suspended: false,
            locked: false,
            deleted: false,
            credential,
        };
        self.persist_user(user, true).await
    }

    /// Apply `update` to an account in one step. Role, suspension and lock
    /// changes need an admin; a password may be changed by its owner too.
    pub async fn update_user(
        &self,
        caller: &Identity,
        user_id: Ulid,
        update: UserUpdate,
    ) -> Result<User, EngineError> {
        if update.needs_admin() {
            caller.require_admin()?;
        } else if !caller.can_act_for(user_id) {
            return Err(EngineError::Permission("cannot change another user's account"));
        }
        let credential = update.password.as_deref().map(new_credential).transpose()?;
        let user = self
            .edit_user(caller, user_id, |u| {
                if let Some(role) = update.role {
                    u.role = role;
                }
                if let Some(suspended) = update.suspended {
                    u.suspended = suspended;
                }
                if let Some(locked) = update.locked {
                    u.locked = locked;
                }
                if let Some(credential) = credential {
                    u.credential = credential;
                }
            })
            .await?;
        info!(
            user = %user_id,
            role = user.role.as_str(),
            suspended = user.suspended,
            locked = user.locked,
            "account updated"
        );
        Ok(user)
    }

    async fn edit_user(
        &self,
        caller: &Identity,
        user_id: Ulid,
        edit: impl FnOnce(&mut User),
    ) -> Result<User, EngineError> {
        let _gate = self.gate().await;
        let _dir = self.directory_lock.lock().await;
        let before = self
            .get_user(&user_id)
            .filter(|u| !u.deleted)
            .ok_or(EngineError::NotFound(user_id))?;
        let mut user = before.clone();
        edit(&mut user);
        self.check_admin_kept(caller, &before, &user)?;
        self.persist_user(user, false).await
    }

    /// An edit may not take admin access away from the caller, nor from the
    /// last admin able to log in. Caller holds `directory_lock`.
    fn check_admin_kept(&self, caller: &Identity, before: &User, after: &User) -> Result<(), EngineError> {
        if !before.is_active_admin() || after.is_active_admin() {
            return Ok(());
        }
        if before.id == caller.user_id {
            return Err(EngineError::InvalidState("cannot remove your own admin access"));
        }
        let other_admin = self
            .users
            .iter()
            .any(|e| e.key() != &before.id && e.value().is_active_admin());
        if !other_admin {
            return Err(EngineError::InvalidState("cannot remove the last admin"));
        }
        Ok(())
    }

    /// Suspend or restore a user's permission to create bookings.
    pub async fn set_booking_suspended(
        &self,
        caller: &Identity,
        user_id: Ulid,
        suspended: bool,
    ) -> Result<User, EngineError> {
        let update = UserUpdate {
            suspended: Some(suspended),
            ..UserUpdate::default()
        };
        self.update_user(caller, user_id, update).await
    }

    pub async fn set_role(&self, caller: &Identity, user_id: Ulid, role: Role) -> Result<User, EngineError> {
        let update = UserUpdate {
            role: Some(role),
            ..UserUpdate::default()
        };
        self.update_user(caller, user_id, update).await
    }

    /// Lock or unlock an account. Locked accounts cannot log in.
    pub async fn set_locked(&self, caller: &Identity, user_id: Ulid, locked: bool) -> Result<User, EngineError> {
        let update = UserUpdate {
            locked: Some(locked),
            ..UserUpdate::default()
        };
        self.update_user(caller, user_id, update).await
    }

    /// Mark an account deleted. Its bookings stay until the sweeper runs.
    pub async fn delete_user(&self, caller: &Identity, user_id: Ulid) -> Result<User, EngineError> {
        caller.require_admin()?;
        let user = self.edit_user(caller, user_id, |u| u.deleted = true).await?;
        info!(user = %user_id, "account deleted");
        Ok(user)
    }

    /// Admin listing of accounts matching `filter`, ordered by username.
    pub fn list_users(&self, caller: &Identity, filter: &UserFilter) -> Result<Vec<User>, EngineError> {
        caller.require_admin()?;
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    // ── Rooms ────────────────────────────────────────────────

    /// Room directory lookup.
    pub async fn get_room(&self, room_id: Ulid) -> Result<Room, EngineError> {
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        Ok(rs.read().await.room.clone())
    }

    pub async fn create_room(&self, caller: &Identity, room: Room) -> Result<(), EngineError> {
        caller.require_admin()?;
        check_name(&room.code, "room code must not be empty")?;
        if room.facilities.len() > MAX_FACILITIES {
            return Err(EngineError::LimitExceeded("too many facilities"));
        }
        let _gate = self.gate().await;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        let room_id = room.id;
        if self.rooms.contains_key(&room_id) {
            return Err(EngineError::AlreadyExists(room_id));
        }

        let event = Event::RoomCreated { room: room.clone() };
        self.wal_append(&event).await?;
        self.rooms
            .insert(room_id, Arc::new(RwLock::new(RoomState::new(room))));
        self.notify.send(room_id, &event);
        Ok(())
    }

    /// Apply `update` to a room as one event. Retiring a room closes its
    /// notification channel.
    pub async fn update_room(
        &self,
        caller: &Identity,
        room_id: Ulid,
        update: RoomUpdate,
    ) -> Result<Room, EngineError> {
        caller.require_admin()?;
        if update.facilities.as_ref().is_some_and(|f| f.len() > MAX_FACILITIES) {
            return Err(EngineError::LimitExceeded("too many facilities"));
        }
        let room = self
            .edit_room(room_id, |room| {
                if let Some(name) = update.display_name {
                    room.display_name = Some(name);
                }
                if let Some(location) = update.location {
                    room.location = Some(location);
                }
                if let Some(capacity) = update.capacity {
                    room.capacity = capacity;
                }
                if let Some(facilities) = update.facilities {
                    room.facilities = facilities;
                }
                if let Some(status) = update.status {
                    room.status = status;
                }
            })
            .await?;
        if let Some(status) = update.status {
            info!(room = %room_id, status = status.as_str(), "room status changed");
        }
        if room.status == RoomStatus::Retired {
            self.notify.remove(&room_id);
        }
        Ok(room)
    }

    pub async fn set_room_status(
        &self,
        caller: &Identity,
        room_id: Ulid,
        status: RoomStatus,
    ) -> Result<Room, EngineError> {
        let update = RoomUpdate {
            status: Some(status),
            ..RoomUpdate::default()
        };
        self.update_room(caller, room_id, update).await
    }

    /// Take a room out of the catalog. Its bookings become orphans.
    pub async fn retire_room(&self, caller: &Identity, room_id: Ulid) -> Result<Room, EngineError> {
        self.set_room_status(caller, room_id, RoomStatus::Retired).await
    }

    async fn edit_room(&self, room_id: Ulid, edit: impl FnOnce(&mut Room)) -> Result<Room, EngineError> {
        let _gate = self.gate().await;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        if guard.room.status == RoomStatus::Retired {
            return Err(EngineError::NotFound(room_id));
        }
        let mut room = guard.room.clone();
        edit(&mut room);
        let event = Event::RoomUpdated { room: room.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(room)
    }
}
