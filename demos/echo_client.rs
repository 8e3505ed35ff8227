use std::io::{Read, Write};
use std::net::TcpStream;

fn main() -> std::io::Result<()> {
    let mut stream = TcpStream::connect("127.0.0.1:9000")?;

    let payload = b"hello from the demo client";
    stream.write_all(&(payload.len() as u32).to_be_bytes())?;
    stream.write_all(payload)?;
    stream.flush()?;

    let mut response = vec![0u8; payload.len()];
    stream.read_exact(&mut response)?;
    println!("{}", String::from_utf8_lossy(&response));

    Ok(())
}
