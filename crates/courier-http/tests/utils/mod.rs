use std::{
    io::{BufRead, BufReader, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    thread,
    time::Duration,
};

use anyhow::{bail, Context as _, Error};
use courier::World;
use courier_http::{listen, serve_fn, HttpConfig, Request, Response};
use courier_mio::{run_event_loop, CompletionPool, Registry};

/// Start a server on its own thread, answering with the handler `make_handler` creates there.
///
/// The thread is left running for the rest of the test process.
pub fn given_server<M, F>(config: HttpConfig, make_handler: M) -> Result<SocketAddr, Error>
where
    M: FnOnce() -> F + Send + 'static,
    F: FnMut(&Request) -> Result<Response, Error> + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    thread::spawn(move || -> Result<(), Error> {
        let mut world = World::default();
        let registry = Registry::new()?;

        let http_events = serve_fn(&mut world, make_handler())?;
        let pool = CompletionPool::new(config.buffer_size);
        let (_actions, _info) = listen(
            &mut world,
            registry.clone(),
            listener,
            pool,
            config,
            http_events,
        )?;

        run_event_loop(&mut world, &registry)
    });

    Ok(addr)
}

pub struct Client {
    reader: BufReader<TcpStream>,
}

impl Client {
    pub fn connect(addr: SocketAddr) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        stream.set_nodelay(true)?;

        Ok(Self {
            reader: BufReader::new(stream),
        })
    }

    pub fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        self.reader.get_mut().write_all(data)?;
        Ok(())
    }

    /// Send one byte per write, pausing in between so they arrive separately.
    pub fn send_slowly(&mut self, data: &[u8]) -> Result<(), Error> {
        for byte in data {
            self.reader.get_mut().write_all(&[*byte])?;
            thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }

    pub fn get(&mut self, path: &str) -> Result<Reply, Error> {
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
        self.send(request.as_bytes())?;
        self.receive()
    }

    pub fn receive(&mut self) -> Result<Reply, Error> {
        self.receive_inner(true)
    }

    /// Receive the reply to a `HEAD` request, which never carries a body.
    pub fn receive_head(&mut self) -> Result<Reply, Error> {
        self.receive_inner(false)
    }

    fn receive_inner(&mut self, with_body: bool) -> Result<Reply, Error> {
        let status_line = self.read_line()?;
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default().to_string();
        let status = parts
            .next()
            .context("missing status code")?
            .parse::<u16>()?;

        let mut headers = Vec::new();
        loop {
            let line = self.read_line()?;
            if line.is_empty() {
                break;
            }

            let (name, value) = line.split_once(':').context("malformed header")?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        let mut reply = Reply {
            version,
            status,
            headers,
            body: Vec::new(),
        };

        if !with_body || status == 101 {
            return Ok(reply);
        }

        if reply.header("transfer-encoding") == Some("chunked") {
            reply.body = self.read_chunked()?;
        } else if let Some(length) = reply.header("content-length") {
            let mut body = vec![0; length.parse()?];
            self.reader.read_exact(&mut body)?;
            reply.body = body;
        }

        Ok(reply)
    }

    fn read_chunked(&mut self) -> Result<Vec<u8>, Error> {
        let mut body = Vec::new();

        loop {
            let size = self.read_line()?;
            let size = usize::from_str_radix(size.trim(), 16)?;

            if size == 0 {
                // Trailers end with an empty line
                while !self.read_line()?.is_empty() {}
                return Ok(body);
            }

            let start = body.len();
            body.resize(start + size, 0);
            self.reader.read_exact(&mut body[start..])?;
            self.read_line()?;
        }
    }

    fn read_line(&mut self) -> Result<String, Error> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            bail!("connection closed");
        }

        Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
    }

    /// Returns true if the server closed the connection, with no further data.
    pub fn is_closed(&mut self) -> Result<bool, Error> {
        let mut rest = Vec::new();
        self.reader.read_to_end(&mut rest)?;
        Ok(rest.is_empty())
    }
}

#[derive(Debug)]
pub struct Reply {
    pub version: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_close(&self) -> bool {
        self.header("connection")
            .map_or(false, |value| value.eq_ignore_ascii_case("close"))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
