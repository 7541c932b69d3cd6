//! TSP wire protocol: message types and their type tags.

/// Type tag of a TSP message, as written in the first byte of a frame body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Init = 0,
    List = 1,
    Info = 2,
    Play = 3,
    Stop = 4,
    Quit = 5,
}

impl MessageType {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(MessageType::Init),
            1 => Some(MessageType::List),
            2 => Some(MessageType::Info),
            3 => Some(MessageType::Play),
            4 => Some(MessageType::Stop),
            5 => Some(MessageType::Quit),
            _ => None,
        }
    }

    /// Whether frames of this type may carry a payload.
    pub fn has_payload(self) -> bool {
        matches!(self, MessageType::Init | MessageType::List)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageType::Init => "INIT",
            MessageType::List => "LIST",
            MessageType::Info => "INFO",
            MessageType::Play => "PLAY",
            MessageType::Stop => "STOP",
            MessageType::Quit => "QUIT",
        };
        f.write_str(name)
    }
}

/// All TSP messages. Each variant carries only the fields its type gives meaning to;
/// framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Peer -> tracker: register. Payload is the serialized catalog advert.
    Init { payload: Vec<u8> },
    /// Peer -> tracker with an empty payload; the tracker replies with the same type
    /// and the serialized master catalog as payload.
    List { payload: Vec<u8> },
    /// Reserved. Song info is answered locally from the cached master list.
    Info { song_id: u32 },
    /// Peer -> peer: stream a song. The reply is the raw file bytes, unframed.
    Play { song_id: u32 },
    /// Reserved for in-band stop; playback is stopped locally.
    Stop { song_id: u32 },
    /// Peer -> tracker: deregister.
    Quit,
}

impl Message {
    /// LIST request as sent to the tracker.
    pub fn list_request() -> Self {
        Message::List {
            payload: Vec::new(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Init { .. } => MessageType::Init,
            Message::List { .. } => MessageType::List,
            Message::Info { .. } => MessageType::Info,
            Message::Play { .. } => MessageType::Play,
            Message::Stop { .. } => MessageType::Stop,
            Message::Quit => MessageType::Quit,
        }
    }

    /// Song id carried by the message; 0 for types without one.
    pub fn song_id(&self) -> u32 {
        match self {
            Message::Info { song_id } | Message::Play { song_id } | Message::Stop { song_id } => {
                *song_id
            }
            _ => 0,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Message::Init { payload } | Message::List { payload } => payload,
            _ => &[],
        }
    }
}
