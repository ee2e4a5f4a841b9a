use anyhow::Result;

use crate::auth::{supabase::CreateUserRequest, AuthProvider};

use super::backend::Backend;

pub async fn process_login_command(backend: &Backend, email: &str, password: &str) -> Result<()> {
    let identity = backend.hosted()?.sign_in_with_password(email, password).await?;
    println!(
        "Signed in as {}",
        identity.email.as_deref().unwrap_or(&identity.user_id)
    );
    Ok(())
}

/// Offline there is nobody to sign out, so this only does something against the backend.
pub async fn process_logout_command(backend: &Backend) -> Result<()> {
    if backend.auth.current_identity().is_none() {
        println!("Not signed in");
        return Ok(());
    }
    match &backend.hosted {
        Some(hosted) => {
            hosted.sign_out().await?;
            println!("Signed out");
        }
        None => println!("The local store has no sessions to sign out of"),
    }
    Ok(())
}

pub async fn process_create_user_command(
    backend: &Backend,
    email: String,
    password: String,
    full_name: String,
) -> Result<()> {
    let request = CreateUserRequest {
        email,
        password,
        full_name,
    };
    backend.hosted()?.create_user(&request).await?;
    println!("Created {}", request.email);
    Ok(())
}
