// XML codecs for the logon exchange and the ManagementConsole document.
//
// The console mixes default and prefixed namespaces (the console element is
// `ManagementConsole:ManagementConsole` inside an Atom feed), so decoding
// walks the event stream and matches on local names only.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use secrecy::ExposeSecret;

use crate::auth::{Credentials, SESSION_HEADER};
use crate::error::Error;
use crate::models::{ConsoleIdentity, DeviceRef, Topology};

const WEB_NS: &str = "http://www.ibm.com/xmlns/systems/power/firmware/web/mc/2012_10/";

/// Render the `LogonRequest` document sent with the logon PUT.
pub fn logon_request(credentials: &Credentials) -> String {
    format!(
        "<LogonRequest schemaVersion=\"V1_0\" xmlns=\"{WEB_NS}\" xmlns:mc=\"{WEB_NS}\">\
         <UserID>{}</UserID><Password>{}</Password></LogonRequest>",
        escape(credentials.username.as_str()),
        escape(credentials.password.expose_secret()),
    )
}

/// Extract the session token from a `LogonResponse` document.
pub fn parse_logon_response(body: &str) -> Result<String, Error> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut in_token = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => in_token = e.local_name().as_ref() == SESSION_HEADER.as_bytes(),
            Ok(Event::Text(t)) if in_token => {
                let token = t
                    .unescape()
                    .map_err(|e| Error::protocol(format!("invalid logon token text: {e}"), body))?;
                let token = token.trim();
                if token.is_empty() {
                    break;
                }
                return Ok(token.to_owned());
            }
            Ok(Event::End(_)) => in_token = false,
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::protocol(format!("failed to parse XML: {e}"), body)),
            Ok(_) => {}
        }
    }

    Err(Error::protocol("logon response carried no session token", body))
}

/// Decode the ManagementConsole feed into a [`Topology`].
pub fn parse_management_console(body: &str) -> Result<Topology, Error> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut console = ConsoleIdentity::default();
    let mut devices = Vec::new();
    let mut saw_console = false;
    let mut entry_id = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"ManagementConsole" {
                    saw_console = true;
                }
                if name == b"link" && within(&stack, b"ManagedSystems") {
                    push_link(&e, body, &mut devices)?;
                }
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"link" && within(&stack, b"ManagedSystems") {
                    push_link(&e, body, &mut devices)?;
                }
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::protocol(format!("invalid text node: {e}"), body))?;
                let text = text.trim();
                match (stack.last().map(Vec::as_slice), parent(&stack)) {
                    (Some(b"MachineType"), Some(b"MachineTypeModelAndSerialNumber")) => {
                        console.machine_type = text.to_owned();
                    }
                    (Some(b"Model"), Some(b"MachineTypeModelAndSerialNumber")) => {
                        console.model = text.to_owned();
                    }
                    (Some(b"SerialNumber"), Some(b"MachineTypeModelAndSerialNumber")) => {
                        console.serial = text.to_owned();
                    }
                    (Some(b"ManagementConsoleName"), _) => console.name = text.to_owned(),
                    (Some(b"AtomID"), _) if console.uuid.is_empty() => {
                        console.uuid = text.to_owned();
                    }
                    (Some(b"id"), Some(b"entry")) if entry_id.is_empty() => {
                        entry_id = text.to_owned();
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::protocol(format!("failed to parse XML: {e}"), body)),
            Ok(_) => {}
        }
    }

    if !saw_console {
        return Err(Error::protocol(
            "document has no ManagementConsole element",
            body,
        ));
    }
    if console.uuid.is_empty() {
        console.uuid = entry_id;
    }

    Ok(Topology { console, devices })
}

fn within(stack: &[Vec<u8>], name: &[u8]) -> bool {
    stack.iter().any(|n| n.as_slice() == name)
}

fn parent(stack: &[Vec<u8>]) -> Option<&[u8]> {
    stack.len().checked_sub(2).and_then(|i| stack.get(i)).map(Vec::as_slice)
}

fn push_link(e: &BytesStart<'_>, body: &str, devices: &mut Vec<DeviceRef>) -> Result<(), Error> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::protocol(format!("invalid link attribute: {err}"), body))?;
        if attr.key.local_name().as_ref() == b"href" {
            let href = attr
                .unescape_value()
                .map_err(|err| Error::protocol(format!("invalid link href: {err}"), body))?;
            devices.push(DeviceRef::from_href(href.into_owned()));
        }
    }
    Ok(())
}
