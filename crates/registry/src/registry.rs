use serde::Serialize;
use std::collections::BTreeMap;
use worldview_common::{EntityId, EntityKey, ParcelId, UserId};
use worldview_protocol::{AvatarSettings, InboundMessage, MessageSink, ParcelData};

use crate::avatar::Avatar;
use crate::entity::Loadable;
use crate::object::WorldObject;

/// A change the viewer has to react to.
///
/// Removal events carry the removed record so that the cache references it
/// still holds can be released.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Connected { client_avatar: EntityId },
    ObjectAdded(EntityId),
    /// Model, voxels or materials changed; loaded resources are stale.
    ObjectAppearanceChanged(EntityId),
    ObjectMoved(EntityId),
    ObjectRemoved(Box<WorldObject>),
    AvatarAdded(EntityId),
    AvatarAppearanceChanged(EntityId),
    AvatarMoved(EntityId),
    AvatarRemoved(Box<Avatar>),
    ParcelAdded(ParcelId),
    LoggedIn(LoginInfo),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginInfo {
    pub user_id: UserId,
    pub username: String,
    pub settings: AvatarSettings,
}

/// Counts for status output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistrySummary {
    pub objects: usize,
    pub avatars: usize,
    pub parcels: usize,
    pub chat_lines: usize,
    pub global_time: Option<f64>,
    pub logged_in_as: Option<String>,
}

/// Every remote entity the client knows about.
///
/// Uses BTreeMap so iteration, and with it load request order, is stable.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    objects: BTreeMap<EntityId, WorldObject>,
    avatars: BTreeMap<EntityId, Avatar>,
    parcels: BTreeMap<ParcelId, ParcelData>,
    chat: Vec<String>,
    client_avatar: Option<EntityId>,
    login: Option<LoginInfo>,
    global_time: Option<f64>,
    event_log: Vec<RegistryEvent>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain events produced since the last call.
    pub fn drain_events(&mut self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.event_log)
    }

    pub fn client_avatar(&self) -> Option<EntityId> {
        self.client_avatar
    }

    pub fn login(&self) -> Option<&LoginInfo> {
        self.login.as_ref()
    }

    pub fn global_time(&self) -> Option<f64> {
        self.global_time
    }

    pub fn chat(&self) -> &[String] {
        &self.chat
    }

    pub fn object(&self, id: EntityId) -> Option<&WorldObject> {
        self.objects.get(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &WorldObject> {
        self.objects.values()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn avatar(&self, id: EntityId) -> Option<&Avatar> {
        self.avatars.get(&id)
    }

    pub fn avatars(&self) -> impl Iterator<Item = &Avatar> {
        self.avatars.values()
    }

    pub fn parcel(&self, id: ParcelId) -> Option<&ParcelData> {
        self.parcels.get(&id)
    }

    pub fn entity(&self, key: EntityKey) -> Option<&dyn Loadable> {
        match key {
            EntityKey::Object(id) => self.objects.get(&id).map(|o| o as &dyn Loadable),
            EntityKey::Avatar(id) => self.avatars.get(&id).map(|a| a as &dyn Loadable),
        }
    }

    pub fn entity_mut(&mut self, key: EntityKey) -> Option<&mut dyn Loadable> {
        match key {
            EntityKey::Object(id) => self.objects.get_mut(&id).map(|o| o as &mut dyn Loadable),
            EntityKey::Avatar(id) => self.avatars.get_mut(&id).map(|a| a as &mut dyn Loadable),
        }
    }

    /// Objects then avatars, excluding the client's own avatar unless
    /// `include_own_avatar` is set.
    pub fn loadables_mut(
        &mut self,
        include_own_avatar: bool,
    ) -> impl Iterator<Item = &mut dyn Loadable> {
        let objects = self.objects.values_mut().map(|o| o as &mut dyn Loadable);
        let avatars = self
            .avatars
            .values_mut()
            .filter(move |a| include_own_avatar || !a.is_own)
            .map(|a| a as &mut dyn Loadable);
        objects.chain(avatars)
    }

    pub fn summary(&self) -> RegistrySummary {
        RegistrySummary {
            objects: self.objects.len(),
            avatars: self.avatars.len(),
            parcels: self.parcels.len(),
            chat_lines: self.chat.len(),
            global_time: self.global_time,
            logged_in_as: self.login.as_ref().map(|l| l.username.clone()),
        }
    }

    /// Apply one decoded server message.
    pub fn apply(&mut self, msg: InboundMessage) {
        match msg {
            InboundMessage::Welcome { client_avatar, .. } => {
                self.client_avatar = Some(client_avatar);
                self.event_log
                    .push(RegistryEvent::Connected { client_avatar });
            }
            InboundMessage::TimeSync { global_time } => {
                self.global_time = Some(global_time);
            }
            InboundMessage::ParcelCreated(parcel) => {
                let id = parcel.id;
                self.parcels.insert(id, parcel);
                self.event_log.push(RegistryEvent::ParcelAdded(id));
            }
            InboundMessage::ObjectInitialSend { uid, object } => {
                // Re-queried cells resend objects we already have.
                if !self.objects.contains_key(&uid) {
                    tracing::trace!(%uid, "object received");
                    self.objects.insert(uid, WorldObject::new(uid, object));
                    self.event_log.push(RegistryEvent::ObjectAdded(uid));
                }
            }
            InboundMessage::ObjectCreated { uid, object }
            | InboundMessage::ObjectFullUpdate { uid, object } => match self.objects.get_mut(&uid) {
                Some(existing) => {
                    if existing.replace_data(object) {
                        self.event_log
                            .push(RegistryEvent::ObjectAppearanceChanged(uid));
                    } else {
                        self.event_log.push(RegistryEvent::ObjectMoved(uid));
                    }
                }
                None => {
                    self.objects.insert(uid, WorldObject::new(uid, object));
                    self.event_log.push(RegistryEvent::ObjectAdded(uid));
                }
            },
            InboundMessage::ObjectTransformUpdate {
                uid,
                pos,
                axis,
                angle,
            } => {
                if let Some(ob) = self.objects.get_mut(&uid) {
                    ob.set_transform(pos, axis, angle);
                    self.event_log.push(RegistryEvent::ObjectMoved(uid));
                }
            }
            InboundMessage::ObjectDestroyed { uid } => {
                if let Some(ob) = self.objects.remove(&uid) {
                    tracing::debug!(%uid, "object destroyed");
                    self.event_log
                        .push(RegistryEvent::ObjectRemoved(Box::new(ob)));
                }
            }
            InboundMessage::Chat { name, message } => {
                self.chat.push(format!("{name}: {message}"));
            }
            InboundMessage::AvatarCreated(data) => self.add_avatar(data, "joined"),
            InboundMessage::AvatarIsHere(data) => self.add_avatar(data, "is here"),
            InboundMessage::AvatarDestroyed { uid } => {
                if let Some(avatar) = self.avatars.remove(&uid) {
                    tracing::info!(%uid, name = %avatar.name, "avatar left");
                    self.chat.push(format!("{} left.", avatar.name));
                    self.event_log
                        .push(RegistryEvent::AvatarRemoved(Box::new(avatar)));
                }
            }
            InboundMessage::AvatarTransformUpdate {
                uid,
                pos,
                rotation,
                anim_state,
            } => {
                if let Some(avatar) = self.avatars.get_mut(&uid) {
                    avatar.set_transform(pos, rotation, anim_state);
                    self.event_log.push(RegistryEvent::AvatarMoved(uid));
                }
            }
            InboundMessage::AvatarFullUpdate(data) => {
                let uid = data.uid;
                match self.avatars.get_mut(&uid) {
                    Some(avatar) => {
                        avatar.name = data.name;
                        avatar.set_transform(data.pos, data.rotation, avatar.anim_state);
                        if avatar.set_settings(data.settings) {
                            self.event_log
                                .push(RegistryEvent::AvatarAppearanceChanged(uid));
                        } else {
                            self.event_log.push(RegistryEvent::AvatarMoved(uid));
                        }
                    }
                    None => {
                        let is_own = Some(uid) == self.client_avatar;
                        self.avatars.insert(uid, Avatar::from_data(data, is_own));
                        self.event_log.push(RegistryEvent::AvatarAdded(uid));
                    }
                }
            }
            InboundMessage::LoggedIn {
                user_id,
                username,
                settings,
            } => {
                tracing::info!(%username, "logged in");
                let own = self.client_avatar.and_then(|id| self.avatars.get_mut(&id));
                if let Some(avatar) = own {
                    if avatar.set_settings(settings.clone()) {
                        self.event_log
                            .push(RegistryEvent::AvatarAppearanceChanged(avatar.uid));
                    }
                }
                let info = LoginInfo {
                    user_id,
                    username,
                    settings,
                };
                self.login = Some(info.clone());
                self.event_log.push(RegistryEvent::LoggedIn(info));
            }
        }
    }

    fn add_avatar(&mut self, data: worldview_protocol::AvatarData, verb: &str) {
        let uid = data.uid;
        let avatar = Avatar::from_data(data, Some(uid) == self.client_avatar);
        tracing::info!(%uid, name = %avatar.name, "avatar {verb}");
        self.chat.push(format!("{} {verb}", avatar.name));
        if let Some(old) = self.avatars.insert(uid, avatar) {
            // Replaced wholesale; whatever the old record held goes.
            self.event_log
                .push(RegistryEvent::AvatarRemoved(Box::new(old)));
        }
        self.event_log.push(RegistryEvent::AvatarAdded(uid));
    }
}

impl MessageSink for EntityRegistry {
    fn on_message(&mut self, msg: InboundMessage) {
        self.apply(msg);
    }
}
