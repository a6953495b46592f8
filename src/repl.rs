//! Line-oriented chat front end over an in-process store
//!
//! Plain lines are sent. Commands:
//!   /older          load the previous page
//!   /peer <id>      switch conversation
//!   /peers [term]   list peers with their last message
//!   /emoji <text>   append to the draft (sent with the next line)
//!   /reply <text>   write a message as the peer
//!   /status         show the session and store state
//!   /offline on|off cut the store off, or reconnect it
//!   /quit           mark yourself offline and exit

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Local, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::chat::directory;
use crate::chat::{key, ChatSession, SessionContext, SessionSettings, SessionUpdate};
use crate::config::Config;
use crate::models::{Message, NewMessage, PeerProfile, UserId};
use crate::remote::{Fields, MemoryStore, RemoteStore};

enum Command {
    Send(String),
    Older,
    Peer(String),
    Peers(String),
    Emoji(String),
    Reply(String),
    Status,
    Offline(String),
    Quit,
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Command::Send(line.to_string()));
        };

        let (name, arg) = rest.split_once(' ').unwrap_or((rest, ""));
        let arg = arg.trim().to_string();
        Some(match name {
            "older" => Command::Older,
            "peer" => Command::Peer(arg),
            "peers" => Command::Peers(arg),
            "emoji" => Command::Emoji(arg),
            "reply" => Command::Reply(arg),
            "status" => Command::Status,
            "offline" => Command::Offline(arg),
            "quit" | "exit" => Command::Quit,
            other => Command::Unknown(other.to_string()),
        })
    }
}

struct Repl {
    store: MemoryStore,
    session: ChatSession,
    config: Config,
    shown: HashSet<String>,
}

/// Run an interactive chat between `user` and `peer`.
pub async fn run(config: Config, user: UserId, peer: UserId, seed: usize) -> Result<()> {
    let store = MemoryStore::new();
    seed_store(&store, &user, &peer, seed).await?;

    let remote: Arc<dyn RemoteStore> = Arc::new(store.clone());
    let session = ChatSession::open(
        remote,
        SessionContext { user: user.clone() },
        SessionSettings::from(&config),
    );
    let mut repl = Repl {
        store,
        session,
        config,
        shown: HashSet::new(),
    };
    repl.select(peer);

    println!(
        "Chatting as {}. /older, /peer <id>, /peers, /emoji <text>, /reply <text>, /status, /offline on|off, /quit",
        user
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = line.context("Failed to read stdin")?;
                let Some(line) = line else { break };
                match Command::parse(&line) {
                    Some(Command::Quit) => break,
                    Some(command) => repl.handle(command).await,
                    None => {}
                }
            }
            update = repl.session.next_update() => {
                match update {
                    Some(update) => repl.render(update),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
        }
    }

    repl.session.teardown_session().await;
    for notice in repl.session.take_notices() {
        tracing::debug!("Unreported notice: {}", notice);
    }
    Ok(())
}

impl Repl {
    fn select(&mut self, peer: UserId) {
        match self.session.select_peer(peer) {
            Ok(conversation) => {
                match conversation.participants() {
                    Some((low, high)) => println!("== {} and {} ({}) ==", low, high, conversation),
                    None => println!("== {} ==", conversation),
                }
                self.shown.clear();
            }
            Err(e) => println!("! {}", e),
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Send(text) => {
                let text = format!("{}{}", self.session.draft(), text);
                self.session.notify_typing(&text);
                if let Err(e) = self.session.send_draft() {
                    println!("! {}", e);
                }
            }
            Command::Older => {
                if self.session.page_in_flight() {
                    println!("(already loading)");
                } else if !self.session.has_more() {
                    println!("(start of conversation)");
                } else if !self.session.load_older_page() {
                    println!("(no conversation open)");
                }
            }
            Command::Peer(raw) => match UserId::parse(raw) {
                Ok(peer) => self.select(peer),
                Err(e) => println!("! {}", e),
            },
            Command::Peers(term) => {
                if let Err(e) = self.list_peers(&term).await {
                    println!("! {:#}", e);
                }
            }
            Command::Emoji(emoji) => {
                self.session.insert_emoji(&emoji);
                println!("draft: {}", self.session.draft());
            }
            Command::Reply(text) => {
                if let Err(e) = self.reply(&text).await {
                    println!("! {:#}", e);
                }
            }
            Command::Status => self.status(),
            Command::Offline(arg) => match arg.as_str() {
                "" | "on" => {
                    self.store.set_offline(true);
                    println!("(store offline: new reads and writes fail)");
                }
                "off" => {
                    self.store.set_offline(false);
                    println!("(store back online)");
                }
                other => println!("! expected /offline on|off, got {}", other),
            },
            Command::Unknown(name) => println!("! unknown command /{}", name),
            Command::Quit => {}
        }
    }

    fn status(&self) {
        let conversation = self
            .session
            .conversation()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string());
        let presence = self
            .session
            .peer_presence()
            .map(|s| s.label())
            .unwrap_or("Offline");
        println!("  conversation: {}", conversation);
        println!("  state:        {:?}", self.session.state());
        println!("  peer:         {}", presence);
        println!(
            "  messages:     {}{}",
            self.session.messages().len(),
            if self.session.has_more() { " (more above)" } else { "" }
        );
        println!(
            "  store:        {} listeners, {} page fetches",
            self.store.listener_count(),
            self.store.fetch_count()
        );
    }

    async fn reply(&self, text: &str) -> Result<()> {
        let peer = self.session.peer().context("No peer selected")?;
        let fields = NewMessage {
            text,
            sender_id: peer,
            receiver_id: self.session.user(),
            timestamp: Utc::now(),
        }
        .to_fields();
        let conversation = key::derive(self.session.user(), peer);
        self.store
            .add(conversation.messages_collection(), fields)
            .await
            .context("Failed to write reply")?;
        Ok(())
    }

    async fn list_peers(&self, term: &str) -> Result<()> {
        let me = self.session.user();
        let profiles = directory::load_peers(&self.store)
            .await
            .context("Failed to load peers")?;
        let matched = directory::filter(&profiles, me, term);
        if matched.is_empty() {
            println!("(no peers)");
            return Ok(());
        }

        let ids = matched
            .iter()
            .map(|p| UserId::parse(p.id.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .context("Stored profile has an invalid id")?;
        let remote: Arc<dyn RemoteStore> = Arc::new(self.store.clone());
        let mut feed = directory::watch_previews(&remote, me, &ids);

        // Every subscription reports its current state first.
        for _ in 0..ids.len() {
            let Some(update) = feed.next().await else { break };
            let name = matched
                .iter()
                .find(|p| p.id == update.peer.as_str())
                .map(|p| p.display_name().to_string())
                .unwrap_or_else(|| update.peer.to_string());
            println!(
                "  {:<16} {}",
                name,
                directory::preview_text(update.last_text.as_deref(), self.config.preview_chars)
            );
        }
        Ok(())
    }

    fn sender_name(&self, message: &Message) -> String {
        if message.sender_id == *self.session.user() {
            return "you".to_string();
        }
        self.session
            .peer_profile()
            .map(|p| p.display_name().to_string())
            .unwrap_or_else(|| message.sender_id.to_string())
    }

    fn line(&self, message: &Message) -> String {
        let time = message
            .timestamp
            .map(|ts| ts.with_timezone(&Local).format("%H:%M").to_string())
            .unwrap_or_else(|| "--:--".to_string());
        format!("  {} {}: {}", time, self.sender_name(message), message.text)
    }

    /// Print the whole conversation under its time headers.
    fn render_all(&mut self) {
        let now = Local::now();
        for (category, messages) in self.session.grouped(&now) {
            println!("-- {} --", category);
            for message in messages {
                println!("{}", self.line(message));
            }
        }
        self.shown = self.session.messages().iter().map(|m| m.id.clone()).collect();
    }

    fn render(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::Messages if self.shown.is_empty() => self.render_all(),
            SessionUpdate::Messages => {
                let fresh: Vec<String> = self
                    .session
                    .messages()
                    .iter()
                    .filter(|m| !self.shown.contains(&m.id))
                    .map(|m| self.line(m))
                    .collect();
                for line in fresh {
                    println!("{}", line);
                }
                self.shown = self.session.messages().iter().map(|m| m.id.clone()).collect();
            }
            SessionUpdate::PageLoaded { inserted, has_more } => {
                println!(
                    "(loaded {} older messages{})",
                    inserted,
                    if has_more { "" } else { ", start of conversation" }
                );
                if inserted > 0 {
                    self.render_all();
                }
            }
            SessionUpdate::PeerPresence(state) => {
                let label = state.map(|s| s.label()).unwrap_or("Offline");
                println!("[{}]", label);
            }
            SessionUpdate::PeerProfile(Some(profile)) => {
                println!("[talking to {}]", profile.display_name());
            }
            SessionUpdate::PeerProfile(None) => {}
            SessionUpdate::Degraded(notice) => println!("! {}", notice),
        }
    }
}

/// Seed profiles for both users and `count` messages spread over the past
/// weeks, so time grouping and pagination have something to show.
async fn seed_store(store: &MemoryStore, user: &UserId, peer: &UserId, count: usize) -> Result<()> {
    for id in [user, peer] {
        let profile = PeerProfile {
            id: id.to_string(),
            name: Some(id.to_string()),
            email: Some(format!("{}@example.com", id)),
            photo_url: None,
        };
        let fields = match serde_json::to_value(&profile).context("Failed to encode profile")? {
            serde_json::Value::Object(fields) => fields,
            _ => Fields::new(),
        };
        store.insert(PeerProfile::path(id), fields);
    }

    let conversation = key::derive(user, peer);
    let now = Utc::now();
    for i in 0..count {
        let (from, to) = if i % 2 == 0 { (peer, user) } else { (user, peer) };
        let text = format!("seeded message {}", i + 1);
        let age = Duration::hours(9 * (count - i) as i64);
        let fields = NewMessage {
            text: &text,
            sender_id: from,
            receiver_id: to,
            timestamp: now - age,
        }
        .to_fields();
        store
            .add(conversation.messages_collection(), fields)
            .await
            .context("Failed to seed messages")?;
    }
    tracing::debug!("Seeded {} messages into {}", count, conversation);
    Ok(())
}
