//! Parser for the IRCv3-flavored chat protocol (tags + PRIVMSG/JOIN/PART/PING)
//! spoken over the chat network's websocket gateway.
//!
//! Grounded on the zero-copy `irc.rs` parser this crate started from, but
//! simplified to owned `String`s: the bridge parses one line at a time off
//! a socket, not a hot path worth zero-copy lifetimes, and owned data is
//! much easier to move across the `ChatClient` state machine's channels.

use fnv::FnvHashMap;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1, take_while_m_n};
use nom::character::complete::{alpha1, char};
use nom::combinator::{opt, recognize, verify};
use nom::multi::{many0, separated_list};
use nom::sequence::{delimited, preceded, terminated, tuple};
use nom::{AsChar, IResult};
use std::convert::identity;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IrcMessage {
    pub tags: FnvHashMap<String, String>,
    pub prefix: Option<IrcPrefix>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    pub fn parse(input: &str) -> Result<IrcMessage, String> {
        let (_, (tags, prefix, command, params)) =
            tuple((irc_tags, opt(irc_prefix), command, command_params))(input.trim_end())
                .map_err(|e| format!("{:?}", e))?;
        Ok(IrcMessage {
            tags: tags.unwrap_or_default(),
            prefix: prefix.map(IrcPrefix::to_owned),
            command: command.to_string(),
            params: params.into_iter().map(str::to_string).collect(),
        })
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// The nick or user in the prefix, whichever is set.
    pub fn sender(&self) -> Option<&str> {
        self.prefix.as_ref().and_then(|p| p.user_or_nick())
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IrcPrefix {
    pub host: Option<String>,
    pub nick: Option<String>,
    pub user: Option<String>,
}

impl IrcPrefix {
    pub fn user_or_nick(&self) -> Option<&str> {
        self.user.as_deref().or(self.nick.as_deref())
    }

    fn to_owned(borrowed: IrcPrefixRef<'_>) -> IrcPrefix {
        IrcPrefix {
            host: borrowed.host.map(str::to_string),
            nick: borrowed.nick.map(str::to_string),
            user: borrowed.user.map(str::to_string),
        }
    }
}

type IrcPrefixRef<'a> = IrcPrefixBorrowed<'a>;

#[derive(Debug, Eq, PartialEq)]
struct IrcPrefixBorrowed<'a> {
    host: Option<&'a str>,
    nick: Option<&'a str>,
    user: Option<&'a str>,
}

fn command(input: &str) -> IResult<&str, &str> {
    alt((alpha1, numeric_command))(input)
}

fn numeric_command(input: &str) -> IResult<&str, &str> {
    take_while_m_n(3, 3, |c: char| c.is_dec_digit())(input)
}

fn command_params(input: &str) -> IResult<&str, Vec<&str>> {
    many0(preceded(spaces1, alt((trailing_param, middle_param))))(input)
}

fn middle_param(input: &str) -> IResult<&str, &str> {
    verify(take_while1(|c: char| !"\r\n\0 ".contains(c)), |s: &str| {
        !s.starts_with(':')
    })(input)
}

fn trailing_param(input: &str) -> IResult<&str, &str> {
    preceded(tag(":"), take_while(|c: char| !"\r\n\0".contains(c)))(input)
}

fn irc_prefix(input: &str) -> IResult<&str, IrcPrefixBorrowed<'_>> {
    let (remaining, (nick_or_server, user, host)) = delimited(
        char(':'),
        tuple((
            take_while1(|chr| !"! ".contains(chr)),
            opt(preceded(tag("!"), take_while1(|chr| !"@ ".contains(chr)))),
            opt(preceded(tag("@"), not_spaces1)),
        )),
        char(' '),
    )(input)?;

    Ok((
        remaining,
        match (nick_or_server, user, host) {
            (nick_or_server, None, None) => {
                if nick_or_server.contains('.') {
                    IrcPrefixBorrowed { host: Some(nick_or_server), user: None, nick: None }
                } else {
                    IrcPrefixBorrowed { host: None, user: None, nick: Some(nick_or_server) }
                }
            }
            (nick_or_server, opt_user, Some(host)) => {
                IrcPrefixBorrowed { host: Some(host), user: opt_user, nick: Some(nick_or_server) }
            }
            (nick_or_server, opt_user, None) => {
                IrcPrefixBorrowed { host: Some(nick_or_server), user: opt_user, nick: None }
            }
        },
    ))
}

fn irc_tags(input: &str) -> IResult<&str, Option<FnvHashMap<String, String>>> {
    let (remaining, list_opt) = opt(delimited(
        char('@'),
        separated_list(char(';'), irc_tag),
        spaces0,
    ))(input)?;
    Ok((
        remaining,
        list_opt.map(|list| {
            list.into_iter()
                .filter_map(|(k, v)| v.map(|v| (k.to_string(), v.to_string())))
                .collect()
        }),
    ))
}

fn irc_tag(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    let (remaining, (key, val)) = tuple((
        irc_tag_key,
        opt(preceded(
            char('='),
            opt(take_while1(|c: char| !" ;".contains(c))),
        )),
    ))(input)?;
    Ok((remaining, (key, val.and_then(identity))))
}

fn irc_tag_key(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        opt(char('+')),
        opt(terminated(take_while1(|c| !"=/".contains(c)), char('/'))),
        take_while1(|c: char| c.is_alphanumeric() || c == '-'),
    )))(input)
}

fn not_spaces1(input: &str) -> IResult<&str, &str> {
    take_while1(|c| c != ' ')(input)
}

fn spaces1(input: &str) -> IResult<&str, &str> {
    take_while1(|c| c == ' ')(input)
}

fn spaces0(input: &str) -> IResult<&str, &str> {
    take_while(|c| c == ' ')(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_privmsg_with_tags() {
        let line = "@badge-info=;badges=;color=#5F9EA0;display-name=SomeUser;mod=0;subscriber=0 :someusername!someusername@someusername.tmi.twitch.tv PRIVMSG #forsen :hello there\r\n";
        let msg = IrcMessage::parse(line).unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.param(0), Some("#forsen"));
        assert_eq!(msg.param(1), Some("hello there"));
        assert_eq!(msg.tag("display-name"), Some("SomeUser"));
        assert_eq!(msg.sender(), Some("someusername"));
    }

    #[test]
    fn parses_welcome_message() {
        let msg = IrcMessage::parse(":tmi.twitch.tv 001 bot :Welcome, GLHF!\r\n").unwrap();
        assert_eq!(msg.command, "001");
        assert_eq!(msg.param(0), Some("bot"));
    }

    #[test]
    fn parses_ping() {
        let msg = IrcMessage::parse("PING :tmi.twitch.tv\r\n").unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.param(0), Some("tmi.twitch.tv"));
    }
}
